//! HTTP helpers shared by the adapters: client construction and status classification.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::adapter::{AdapterError, ProviderKind};

const USER_AGENT: &str = concat!("Poblysh-Publisher/", env!("CARGO_PKG_VERSION"));
const BODY_SNIPPET_CHARS: usize = 200;

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|err| {
            warn!(error = %err, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Decodes a successful JSON body, or classifies the failure status.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: ProviderKind,
    response: Response,
) -> Result<T, AdapterError> {
    if !response.status().is_success() {
        return Err(error_from_response(provider, response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AdapterError::malformed(format!("{provider}: {e}")))
}

/// Maps a non-success response onto the adapter error taxonomy.
pub(crate) async fn error_from_response(provider: ProviderKind, response: Response) -> AdapterError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    classify_status(provider, status, retry_after, &body)
}

pub(crate) fn classify_status(
    provider: ProviderKind,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> AdapterError {
    let snippet = snippet(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdapterError::Unauthorized {
            message: format!("{provider} returned {status}: {snippet}"),
        },
        StatusCode::TOO_MANY_REQUESTS => {
            warn!(provider = %provider, retry_after, "Rate limited by provider");
            AdapterError::RateLimited {
                retry_after_secs: retry_after,
            }
        }
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => AdapterError::Transient {
            message: format!("{provider} returned {status}"),
        },
        _ => AdapterError::ProviderRejected {
            message: format!("{provider} returned {status}: {snippet}"),
        },
    }
}

pub(crate) fn snippet(body: &str) -> String {
    if body.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}
