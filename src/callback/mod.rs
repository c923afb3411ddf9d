//! Landing endpoint for the provider's post-authorization redirect.
//!
//! The handler is framework-independent: [`handle_callback`] turns query
//! parameters into a [`CallbackPage`]. The `server` feature serves it over
//! axum.

#[cfg(feature = "server")]
pub mod server;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::oneshot;

#[cfg(feature = "server")]
pub use server::CallbackServer;

/// Query parameters of the redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackQuery {
    pub flow_id: Option<String>,
    /// Requisition reference appended by the provider.
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    /// Set by the provider when the user cancelled or the bank refused.
    pub error: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("Flow not found or expired. Please try again.")]
    UnknownFlow,
    #[error("Failed to complete authorization: {0}")]
    Failed(String),
}

/// Something waiting for redirects, addressed by flow id.
#[async_trait]
pub trait FlowResumer: Send + Sync {
    async fn resume(&self, flow_id: &str, query: CallbackQuery) -> Result<(), ResumeError>;
}

/// Rendered HTML response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPage {
    pub status: u16,
    pub html: String,
}

impl CallbackPage {
    fn success() -> Self {
        Self {
            status: 200,
            html: SUCCESS_PAGE.to_string(),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            status: 400,
            html: ERROR_PAGE.replace("{message}", &escape_html(message)),
        }
    }
}

/// Resume the flow named by `query.flow_id`.
pub async fn handle_callback(resumer: &dyn FlowResumer, query: CallbackQuery) -> CallbackPage {
    tracing::info!(
        flow_id = ?query.flow_id,
        reference = ?query.reference,
        error = ?query.error,
        "Received authorization callback"
    );
    let Some(flow_id) = query.flow_id.clone().filter(|id| !id.is_empty()) else {
        tracing::error!("Callback without flow id");
        return CallbackPage::error("Missing flow ID in callback URL");
    };

    match resumer.resume(&flow_id, query).await {
        Ok(()) => CallbackPage::success(),
        Err(err) => {
            tracing::error!(flow_id = %flow_id, error = %err, "Could not resume flow");
            CallbackPage::error(&err.to_string())
        }
    }
}

/// Flows waiting for their redirect, each completed through a oneshot.
#[derive(Debug, Default)]
pub struct PendingFlows {
    waiting: Mutex<HashMap<String, oneshot::Sender<CallbackQuery>>>,
}

impl PendingFlows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `flow_id`. Registering again replaces the earlier
    /// waiter.
    pub fn register(&self, flow_id: impl Into<String>) -> oneshot::Receiver<CallbackQuery> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(flow_id.into(), tx);
        rx
    }

    pub fn cancel(&self, flow_id: &str) {
        self.lock().remove(flow_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<CallbackQuery>>> {
        self.waiting.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl FlowResumer for PendingFlows {
    async fn resume(&self, flow_id: &str, query: CallbackQuery) -> Result<(), ResumeError> {
        let sender = self.lock().remove(flow_id).ok_or(ResumeError::UnknownFlow)?;
        sender.send(query).map_err(|_| ResumeError::UnknownFlow)
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Complete</title></head>
<body>
<h1>Authorization Complete</h1>
<p>Your bank account has been connected.</p>
<p>You can close this window.</p>
<script>setTimeout(function () { if (window.opener) { window.close(); } }, 3000);</script>
</body>
</html>"#;

const ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Error</title></head>
<body>
<h1>Authorization Error</h1>
<p>There was a problem completing the bank authorization. Please try again.</p>
<pre>{message}</pre>
</body>
</html>"#;
