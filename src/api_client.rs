use crate::auth::{AdsCredentials, GOOGLE_TOKEN_URL};
use crate::config::Config;
use crate::error::Error;
use crate::http::{endpoint, ensure_success};
use crate::storage::ByteStream;
use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use log::info;
use reqwest::{header::AUTHORIZATION, Client};

const REPORT_DOWNLOAD_URL: &str = "https://adwords.google.com";
const API_VERSION: &str = "v201809";

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AdsApi: Send + Sync + 'static {
    /// Requests a report and returns its CSV body as a stream of chunks.
    /// # Arguments
    /// * `query` - The report selection to run.
    /// * `options` - Formatting flags applied to the CSV output.
    /// # Returns
    /// A Result containing either the body stream or an Error. Errors that
    /// occur while the body is streaming surface as items of the stream.
    async fn download_report(
        &self,
        query: &ReportQuery,
        options: &DownloadOptions,
    ) -> Result<ByteStream, Error>;
}

/// Window a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Last7Days,
    /// Inclusive on both ends.
    Between(NaiveDate, NaiveDate),
}

impl DateRange {
    pub fn from_config(config: &Config) -> Self {
        match (config.report_start, config.report_end) {
            (Some(start), Some(end)) => DateRange::Between(start, end),
            _ => DateRange::Last7Days,
        }
    }

    fn to_awql(self) -> String {
        match self {
            DateRange::Last7Days => "LAST_7_DAYS".to_string(),
            DateRange::Between(start, end) => {
                format!("{},{}", start.format("%Y%m%d"), end.format("%Y%m%d"))
            }
        }
    }
}

/// A declarative report selection, rendered as AWQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportQuery {
    pub fields: Vec<&'static str>,
    pub report: &'static str,
    /// `field = "value"` conditions, joined with AND.
    pub conditions: Vec<(&'static str, &'static str)>,
    pub during: DateRange,
}

impl ReportQuery {
    pub fn to_awql(&self) -> String {
        let mut awql = format!("SELECT {} FROM {}", self.fields.join(", "), self.report);

        if !self.conditions.is_empty() {
            let conditions = self
                .conditions
                .iter()
                .map(|(field, value)| format!("{} = \"{}\"", field, value))
                .collect::<Vec<_>>()
                .join(" AND ");
            awql.push_str(" WHERE ");
            awql.push_str(&conditions);
        }

        awql.push_str(" DURING ");
        awql.push_str(&self.during.to_awql());
        awql
    }
}

/// Output flags sent with every report download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    pub skip_report_header: bool,
    pub skip_column_header: bool,
    pub skip_report_summary: bool,
    pub include_zero_impressions: bool,
}

impl DownloadOptions {
    /// Header row plus data rows only, no zero-impression rows.
    pub const CSV_ROWS_ONLY: DownloadOptions = DownloadOptions {
        skip_report_header: true,
        skip_column_header: false,
        skip_report_summary: true,
        include_zero_impressions: false,
    };

    pub fn headers(&self) -> [(&'static str, &'static str); 4] {
        let flag = |value: bool| if value { "true" } else { "false" };
        [
            ("skipReportHeader", flag(self.skip_report_header)),
            ("skipColumnHeader", flag(self.skip_column_header)),
            ("skipReportSummary", flag(self.skip_report_summary)),
            ("includeZeroImpressions", flag(self.include_zero_impressions)),
        ]
    }
}

/// Report downloads against the AdWords report download endpoint.
pub struct AdWordsClient {
    client: Client,
    credentials: AdsCredentials,
    base_url: String,
    token_url: String,
}

impl AdWordsClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let credentials = AdsCredentials::load(&config.ads_config_path)?;
        info!(
            "loaded ads API credentials for customer {}",
            credentials.client_customer_id
        );

        Ok(AdWordsClient {
            client: Client::new(),
            credentials,
            base_url: REPORT_DOWNLOAD_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl AdsApi for AdWordsClient {
    async fn download_report(
        &self,
        query: &ReportQuery,
        options: &DownloadOptions,
    ) -> Result<ByteStream, Error> {
        let url = endpoint(
            &self.base_url,
            &["api", "adwords", "reportdownload", API_VERSION],
        )?;

        let token = self
            .credentials
            .access_token(&self.client, &self.token_url)
            .await?;

        let awql = query.to_awql();
        info!("requesting report: {}", awql);

        let mut request = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header("developerToken", &self.credentials.developer_token)
            .header("clientCustomerId", &self.credentials.client_customer_id);
        for (name, value) in options.headers() {
            request = request.header(name, value);
        }

        let resp = request
            .form(&[("__rdquery", awql.as_str()), ("__fmt", "CSV")])
            .send()
            .await?;
        let resp = ensure_success("AdWords", resp).await?;

        Ok(resp.bytes_stream().map_err(Error::from).boxed())
    }
}
