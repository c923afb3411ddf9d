//! Access token lifecycle for one credential set.

use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::auth::error::AuthError;
use crate::auth::token::{
    NewTokenRequest, NewTokenResponse, RefreshTokenRequest, RefreshTokenResponse, TokenState,
};
use crate::config::Credentials;
use crate::context::ClientContext;

const NEW_TOKEN_PATH: &str = "/api/v2/token/new/";
const REFRESH_TOKEN_PATH: &str = "/api/v2/token/refresh/";

/// Hands out a currently valid access token, renewing it through the refresh
/// token or a fresh secret exchange when needed.
///
/// Renewals are single-flight: concurrent callers queue behind the one
/// in progress and then see its result.
pub struct TokenManager {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    context: Arc<ClientContext>,
    renewal: Mutex<()>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Credentials,
        context: Arc<ClientContext>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            context,
            renewal: Mutex::new(()),
        }
    }

    /// Return an access token valid for at least the renew-ahead window.
    pub async fn ensure_valid_token(&self) -> Result<String, AuthError> {
        let _renewal = self.renewal.lock().await;

        let now = self.context.now();
        let current = self.context.lock().await?.tokens.clone();
        if let Some(access) = current.as_ref().and_then(|t| t.usable_access(now)) {
            return Ok(access.to_string());
        }

        if let Some(refresh) = current.as_ref().and_then(|t| t.usable_refresh(now)) {
            match self.refresh_access(refresh).await {
                Ok(access) => return Ok(access),
                Err(AuthError::Storage(err)) => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(error = %err, "Token refresh failed, requesting new tokens");
                }
            }
        }

        self.acquire_new().await
    }

    /// Forget the access token so the next call renews it.
    pub async fn invalidate_access(&self) -> Result<(), AuthError> {
        let mut state = self.context.lock().await?;
        if let Some(tokens) = state.tokens.as_mut() {
            tokens.invalidate_access();
            state.persist()?;
            tracing::debug!("Access token invalidated");
        }
        Ok(())
    }

    /// Currently stored tokens, without renewing anything.
    pub async fn tokens(&self) -> Result<Option<TokenState>, AuthError> {
        Ok(self.context.lock().await?.tokens.clone())
    }

    async fn refresh_access(&self, refresh: &str) -> Result<String, AuthError> {
        tracing::debug!("Refreshing access token");
        let response: RefreshTokenResponse = self
            .post_token(REFRESH_TOKEN_PATH, &RefreshTokenRequest { refresh }, false)
            .await?;
        let access = response.access.clone();

        let now = self.context.now();
        let mut state = self.context.lock().await?;
        state
            .tokens
            .get_or_insert_with(TokenState::default)
            .apply_refresh(now, response);
        state.persist()?;
        tracing::info!("Access token refreshed");
        Ok(access)
    }

    async fn acquire_new(&self) -> Result<String, AuthError> {
        tracing::debug!("Requesting new token pair");
        let response: NewTokenResponse = self
            .post_token(
                NEW_TOKEN_PATH,
                &NewTokenRequest {
                    secret_id: &self.credentials.secret_id,
                    secret_key: &self.credentials.secret_key,
                },
                true,
            )
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "Failed to obtain new tokens");
                err
            })?;
        let access = response.access.clone();

        let now = self.context.now();
        let mut state = self.context.lock().await?;
        state.tokens = Some(TokenState::from_new(now, response));
        state.persist()?;
        tracing::info!("Obtained new token pair");
        Ok(access)
    }

    async fn post_token<B, T>(&self, path: &str, body: &B, with_secrets: bool) -> Result<T, AuthError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(if with_secrets {
                AuthError::InvalidCredentials {
                    status: status.as_u16(),
                }
            } else {
                AuthError::ExpiredOrInvalidGrant
            });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::InvalidResponse(format!(
                "token endpoint returned {status}: {text}"
            )));
        }
        Ok(resp.json::<T>().await?)
    }
}
