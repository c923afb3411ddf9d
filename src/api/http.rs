//! HTTP client construction and response helpers.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{BankDataError, Result};

/// Build the client shared by token renewal and API calls.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .user_agent(concat!("bankdata/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| BankDataError::Configuration(format!("cannot build HTTP client: {err}")))
}

/// Default headers for a Bearer-token API.
pub fn bearer_headers(access_token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Turn a non-success response into an error, preferring the provider's
/// `summary`/`detail` fields over the raw body.
pub fn status_to_error(status: u16, body: &str) -> BankDataError {
    BankDataError::http(status, error_message(body))
}

fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    match (field("summary"), field("detail")) {
        (Some(summary), Some(detail)) if summary != detail => format!("{summary}: {detail}"),
        (Some(summary), _) => summary,
        (None, Some(detail)) => detail,
        (None, None) if body.trim().is_empty() => "empty response body".to_string(),
        (None, None) => body.trim().to_string(),
    }
}
