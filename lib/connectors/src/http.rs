//! Shared HTTP response handling for provider connectors.

use patchbay_integration::ConnectorError;
use reqwest::{Response, StatusCode};

/// Maps a non-success status to a connector error.
///
/// Auth failures (401/403) mean the credential is bad, 429 is throttling
/// and carries the provider's retry hint when present, 408 is a deadline
/// problem, and anything else is a protocol-level surprise.
pub(crate) fn classify_status(status: StatusCode, retry_after_secs: Option<u64>) -> ConnectorError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ConnectorError::auth(format!("provider returned {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited { retry_after_secs },
        StatusCode::REQUEST_TIMEOUT => ConnectorError::Timeout,
        _ => ConnectorError::protocol(format!("unexpected status {status}")),
    }
}

/// Maps a transport failure to a connector error.
pub(crate) fn transport_error(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::Timeout
    } else {
        ConnectorError::protocol(err.to_string())
    }
}

/// Passes success responses through and classifies everything else.
pub(crate) fn check(response: Response) -> Result<Response, ConnectorError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let retry_after = retry_after_secs(&response);
        Err(classify_status(response.status(), retry_after))
    }
}

fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
