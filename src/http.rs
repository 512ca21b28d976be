use crate::error::Error;
use reqwest::{Response, Url};

/// Appends `segments` to `base`, percent-encoding each one, so object and
/// table names can never escape their path position.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, Error> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turns a non-2xx response into [`Error::ApiResponse`], keeping the body for the log.
pub(crate) async fn ensure_success(
    service: &'static str,
    resp: Response,
) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(Error::ApiResponse {
        service,
        status: status.as_u16(),
        body,
    })
}
