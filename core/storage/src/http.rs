//! Shared HTTP plumbing for the WebDAV and Google Drive backends.

use reqwest::{Client, StatusCode};
use std::error::Error as StdError;
use std::time::Duration;

use notesync_common::{Error, Result};

/// User agent sent by every HTTP backend.
pub const USER_AGENT: &str = concat!("notesync/", env!("CARGO_PKG_VERSION"));

/// Timeout for establishing a TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the HTTP client used by a backend.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

/// Classify a transport failure (no HTTP response was received).
///
/// Name resolution failures are only visible in the source chain, so the
/// chain is inspected before falling back to reqwest's own flags.
pub fn map_transport_error(err: reqwest::Error, context: &str) -> Error {
    if is_dns_failure(&err) {
        let host = err
            .url()
            .and_then(|u| u.host_str())
            .unwrap_or("unknown")
            .to_string();
        return Error::UnknownHost(host);
    }
    if err.is_connect() {
        return Error::Connect(format!("{}: {}", context, err));
    }
    if err.is_builder() {
        return Error::InvalidInput(format!("{}: {}", context, err));
    }
    Error::Network(format!("{}: {}", context, err))
}

fn is_dns_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("name or service not known")
            || text.contains("no such host")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Map a non-success HTTP status to an error.
///
/// Returns `None` for 2xx statuses.
pub fn map_status(status: StatusCode, context: &str) -> Option<Error> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED => Error::Authentication(format!("{}: {}", context, status)),
        StatusCode::FORBIDDEN => Error::PermissionDenied(format!("{}: {}", context, status)),
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Error::NotFound(format!("{}: {}", context, status))
        }
        StatusCode::CONFLICT => Error::NotFound(format!("{}: parent missing ({})", context, status)),
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Error::Network(format!("{}: {}", context, status)),
        _ => Error::Storage(format!("{}: {}", context, status)),
    })
}

/// Turn a response into an error when its status is not 2xx, including a
/// short excerpt of the body for diagnostics.
pub async fn check_response(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
    let status = response.status();
    match map_status(status, context) {
        None => Ok(response),
        Some(err) => {
            let body = response.text().await.unwrap_or_default();
            if !body.is_empty() {
                tracing::debug!(%status, context, body = %truncate(&body, 256), "HTTP request failed");
            }
            Err(err)
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
