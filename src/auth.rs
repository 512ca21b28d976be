use crate::error::Error;
use crate::http::ensure_success;
use gcp_bigquery_client::yup_oauth2::{parse_service_account_key, ServiceAccountKey};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use std::fs;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Reads the service-account key used by the warehouse client.
pub fn service_account_key(path: &str) -> Result<ServiceAccountKey, Error> {
    let credentials_error = |err: std::io::Error| Error::Credentials {
        path: path.to_string(),
        message: err.to_string(),
    };

    let contents = fs::read_to_string(path).map_err(credentials_error)?;
    parse_service_account_key(contents).map_err(credentials_error)
}

/// The `adwords` section of a `googleads.yaml` file.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AdsCredentials {
    pub developer_token: String,
    pub client_customer_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Deserialize)]
struct GoogleAdsFile {
    adwords: AdsCredentials,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl AdsCredentials {
    pub fn load(path: &str) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|err| Error::Credentials {
            path: path.to_string(),
            message: err.to_string(),
        })?;

        let file: GoogleAdsFile =
            serde_yaml::from_str(&contents).map_err(|err| Error::Credentials {
                path: path.to_string(),
                message: err.to_string(),
            })?;

        Ok(file.adwords)
    }

    /// Exchanges the refresh token for a short-lived access token.
    pub async fn access_token(&self, client: &Client, token_url: &str) -> Result<String, Error> {
        debug!("refreshing ads API access token for {}", self.client_customer_id);

        let resp = client
            .post(token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let token = ensure_success("OAuth2", resp)
            .await?
            .json::<TokenResponse>()
            .await?;

        Ok(token.access_token)
    }
}
