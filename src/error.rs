use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("HTTP request failed: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("{service} responded with {status}: {body}")]
    ApiResponse {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("Failed to read credentials from {path}: {message}")]
    Credentials { path: String, message: String },

    #[error("BigQuery: {0}")]
    BigQuery(#[from] gcp_bigquery_client::error::BQError),

    #[error("Cloud Storage: {0}")]
    Storage(#[from] google_cloud_storage::http::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table {table} not found")]
    TableNotFound { table: String },

    #[error("Load job {job_id} into {table} failed: {message}")]
    LoadJobFailed {
        job_id: String,
        table: String,
        message: String,
    },

    #[error("Column '{name}' appears more than once after normalization")]
    DuplicateColumn { name: String },

    #[error("{step} did not finish within {secs}s")]
    Timeout { step: String, secs: u64 },

    #[error("{message}")]
    NoData { message: String },

    #[error("Run aborted while {step} (dropped and not reloaded: [{dropped}]): {source}")]
    RunAborted {
        step: String,
        dropped: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Unwraps [`Error::RunAborted`] down to the error that caused it.
    pub fn root(&self) -> &Error {
        match self {
            Error::RunAborted { source, .. } => source.root(),
            other => other,
        }
    }
}
