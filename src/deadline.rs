use crate::error::Error;
use std::future::Future;
use std::time::Duration;

/// Runs one external call, failing with [`Error::Timeout`] if it takes longer
/// than `limit`. The call is dropped, and so cancelled, on timeout.
pub async fn with_timeout<T, F>(step: &str, limit: Duration, call: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            step: step.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
