//! HTTP plumbing shared by the fetchers.
//!
//! [`send_bytes`] performs one request and maps every failure onto
//! [`FetchError`]: connection problems, timeouts, HTTP 408/429 and 5xx are
//! transient; every other 4xx is permanent.

use std::time::Duration;

use reqwest::StatusCode;

use crate::FetchError;

/// Settings for the shared HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: format!("divvy-lake/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Builds the client shared by all fetchers of a run.
///
/// # Errors
///
/// Returns [`reqwest::Error`] if the TLS backend cannot be initialized.
pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(&settings.user_agent)
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .build()
}

/// Classifies a non-success HTTP status. Returns `None` for 2xx/3xx.
#[must_use]
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() || status.is_redirection() {
        return None;
    }
    let message = format!("HTTP {status}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Some(FetchError::transient(message))
    } else {
        Some(FetchError::permanent(message))
    }
}

/// Maps a transport-level error from `reqwest`.
#[must_use]
pub fn classify_error(e: &reqwest::Error) -> FetchError {
    if let Some(error) = e.status().and_then(classify_status) {
        return error;
    }
    if is_transient(e) {
        FetchError::transient(e.to_string())
    } else {
        FetchError::permanent(e.to_string())
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

/// Sends one request and returns the response body.
///
/// # Errors
///
/// Returns [`FetchError`] classified per the module rules.
pub async fn send_bytes(request: reqwest::RequestBuilder) -> Result<Vec<u8>, FetchError> {
    let response = request.send().await.map_err(|e| classify_error(&e))?;
    let url = response.url().to_string();
    let status = response.status();

    if let Some(error) = classify_status(status) {
        log::debug!("{url} -> {status}");
        return Err(error);
    }

    let body = response.bytes().await.map_err(|e| {
        FetchError::transient(format!("failed to read response body from {url}: {e}"))
    })?;
    log::debug!("{url} -> {status}, {} bytes", body.len());
    Ok(body.to_vec())
}

/// Sends one request and parses the response body as JSON.
///
/// # Errors
///
/// Returns [`FetchError::Validation`] if the body is not valid JSON, or the
/// errors of [`send_bytes`].
pub async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, FetchError> {
    let body = send_bytes(request).await?;
    serde_json::from_slice(&body)
        .map_err(|e| FetchError::validation(format!("response is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_redirects_are_not_errors() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(classify_status(StatusCode::NO_CONTENT).is_none());
        assert!(classify_status(StatusCode::NOT_MODIFIED).is_none());
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let error = classify_status(status).unwrap();
            assert!(error.is_transient(), "{status} should be transient");
        }
    }

    #[test]
    fn other_client_errors_are_permanent() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            let error = classify_status(status).unwrap();
            assert!(matches!(error, FetchError::Permanent { .. }), "{status}");
        }
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND).unwrap().message(),
            "HTTP 404 Not Found"
        );
    }

    #[test]
    fn default_client_builds() {
        assert!(build_client(&HttpSettings::default()).is_ok());
    }
}
