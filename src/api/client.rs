//! Authenticated, quota-aware request executor.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::api::headers::ProviderRateLimits;
use crate::api::http::{bearer_headers, build_client, status_to_error};
use crate::auth::TokenManager;
use crate::config::{BankDataConfig, RateLimits};
use crate::context::ClientContext;
use crate::error::{BankDataError, Result};
use crate::ratelimit::{Quota, RateLimitGovernor};
use crate::store::StateStore;
use crate::util::{Clock, SystemClock};

/// Client for one credential set.
///
/// Cheap to clone; clones share tokens, quota counters and the connection
/// pool.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use bankdata::api::BankDataClient;
/// use bankdata::config::{BankDataConfig, Credentials};
/// use bankdata::store::MemoryStateStore;
///
/// # async fn run() -> bankdata::error::Result<()> {
/// let config = BankDataConfig::builder()
///     .credentials(Credentials::new("id", "key"))
///     .build();
/// let client = BankDataClient::new(&config, Arc::new(MemoryStateStore::new()))?;
/// let requisitions = client.list_requisitions().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BankDataClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    limits: RateLimits,
    timeout_ms: u64,
    context: Arc<ClientContext>,
    tokens: TokenManager,
    governor: RateLimitGovernor,
}

impl BankDataClient {
    pub fn new(config: &BankDataConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &BankDataConfig,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = build_client(config.request_timeout)?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let context = Arc::new(ClientContext::new(store, config.client_state_key(), clock));
        let tokens = TokenManager::new(
            http.clone(),
            base_url.clone(),
            config.credentials.clone(),
            context.clone(),
        );
        let governor = RateLimitGovernor::new(context.clone());
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                limits: config.rate_limits,
                timeout_ms: u64::try_from(config.request_timeout.as_millis()).unwrap_or(u64::MAX),
                context,
                tokens,
                governor,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn limits(&self) -> &RateLimits {
        &self.inner.limits
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.inner.context
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    pub fn governor(&self) -> &RateLimitGovernor {
        &self.inner.governor
    }

    /// Send one authenticated request and decode its JSON body.
    ///
    /// When `quota` is given, one unit is consumed first; a refusal returns
    /// [`BankDataError::RateLimitExceeded`] without touching the network. A
    /// provider 429 uses up the rest of that quota's window.
    /// Empty success bodies decode to `Value::Null`.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        quota: Option<&Quota>,
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = self.inner.tokens.ensure_valid_token().await?;

        if let Some(quota) = quota {
            if !self
                .inner
                .governor
                .try_consume(&quota.key, quota.max_per_day)
                .await?
            {
                let reset_at = self
                    .inner
                    .governor
                    .entry(&quota.key)
                    .await?
                    .map(|entry| entry.reset_time)
                    .unwrap_or_else(|| self.inner.context.now());
                return Err(BankDataError::RateLimitExceeded {
                    key: quota.key.clone(),
                    reset_at,
                });
            }
        }

        let url = format!("{}{}", self.inner.base_url, path);
        tracing::debug!(%method, path, "Sending request");
        let mut request = self
            .inner
            .http
            .request(method.clone(), &url)
            .headers(bearer_headers(&token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await.map_err(|err| self.transport_error(err))?;
        ProviderRateLimits::from_headers(resp.headers()).log(path);
        let status = resp.status();
        let text = resp.text().await.map_err(|err| self.transport_error(err))?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                tracing::warn!(path, "Access token rejected, invalidating");
                self.inner.tokens.invalidate_access().await?;
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(path, "Provider quota exhausted");
                if let Some(quota) = quota {
                    self.inner
                        .governor
                        .exhaust(&quota.key, quota.max_per_day)
                        .await?;
                }
            }
            return Err(status_to_error(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| {
            BankDataError::InvalidResponse(format!("{method} {path}: invalid JSON: {err}"))
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> BankDataError {
        if err.is_timeout() {
            BankDataError::Timeout(self.inner.timeout_ms)
        } else {
            err.into()
        }
    }
}
