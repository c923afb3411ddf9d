//! axum server for the callback endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::callback::{handle_callback, CallbackQuery, FlowResumer};
use crate::error::{BankDataError, Result};
use crate::link::CALLBACK_PATH;

/// Router serving the callback endpoint.
pub fn router(resumer: Arc<dyn FlowResumer>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback))
        .with_state(resumer)
}

async fn callback(
    State(resumer): State<Arc<dyn FlowResumer>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let page = handle_callback(resumer.as_ref(), query).await;
    let status = StatusCode::from_u16(page.status).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Html(page.html)).into_response()
}

/// Background HTTP server for the callback endpoint.
pub struct CallbackServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `addr` (port 0 picks a free port) and start serving.
    pub async fn start(addr: SocketAddr, resumer: Arc<dyn FlowResumer>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            BankDataError::Network(format!("failed to bind callback server on {addr}: {err}"))
        })?;
        let addr = listener.local_addr().map_err(|err| {
            BankDataError::Network(format!("failed to determine callback address: {err}"))
        })?;

        let app = router(resumer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %err, "Callback server error");
            }
        });
        tracing::info!(%addr, "Callback server listening");

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL to configure as the callback base when serving locally.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting requests and wait for in-flight ones.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    return Err(BankDataError::InvalidState(format!(
                        "callback server panicked: {err}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}
