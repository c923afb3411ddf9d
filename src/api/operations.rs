//! Typed domain operations on top of [`BankDataClient::execute`].
//!
//! Every operation logs its own failure before returning it: local quota
//! refusals at debug level (they are routine deferrals), anything else at
//! error level.

use std::collections::HashSet;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::client::BankDataClient;
use crate::api::types::{Institution, NewRequisition, Page, Requisition};
use crate::error::{BankDataError, Result};
use crate::ratelimit::{Quota, Scope};

const REQUISITIONS_PATH: &str = "/api/v2/requisitions/";
/// Upper bound on pages followed in one listing.
const MAX_PAGES: usize = 50;

impl BankDataClient {
    /// Check that the credentials can obtain a token and list requisitions.
    pub async fn validate_credentials(&self) -> Result<()> {
        self.execute(Method::GET, REQUISITIONS_PATH, None, None)
            .await
            .map(|_| ())
            .map_err(|err| logged("validate credentials", err))
    }

    /// All requisitions, following `next` links across pages.
    ///
    /// Stops at a link already visited, a link to another host, or after
    /// `MAX_PAGES` pages.
    pub async fn list_requisitions(&self) -> Result<Vec<Requisition>> {
        let mut requisitions = Vec::new();
        let mut visited = HashSet::new();
        let mut path = REQUISITIONS_PATH.to_string();
        loop {
            let page: Page<Requisition> = self
                .get_json(&path, None)
                .await
                .map_err(|err| logged("list requisitions", err))?;
            requisitions.extend(page.results);
            visited.insert(path.clone());

            let Some(next) = page.next else { break };
            if visited.len() >= MAX_PAGES {
                tracing::warn!(pages = visited.len(), "Requisition listing hit the page limit");
                break;
            }
            match self.relative_path(&next) {
                Some(next_path) if !visited.contains(&next_path) => path = next_path,
                Some(next_path) => {
                    tracing::warn!(next = %next_path, "Requisition pagination loops, stopping");
                    break;
                }
                None => {
                    tracing::warn!(next = %next, "Ignoring pagination link to a foreign host");
                    break;
                }
            }
        }
        tracing::debug!(count = requisitions.len(), "Fetched requisitions");
        Ok(requisitions)
    }

    pub async fn get_requisition(&self, requisition_id: &str) -> Result<Requisition> {
        self.get_json(&format!("{REQUISITIONS_PATH}{requisition_id}/"), None)
            .await
            .map_err(|err| logged("get requisition", err))
    }

    pub async fn create_requisition(&self, request: &NewRequisition) -> Result<Requisition> {
        let body = serde_json::to_value(request)?;
        let value = self
            .execute(Method::POST, REQUISITIONS_PATH, None, Some(&body))
            .await
            .map_err(|err| logged("create requisition", err))?;
        let requisition: Requisition = decode(value, "requisition")?;
        tracing::info!(
            requisition_id = %requisition.id,
            institution_id = %requisition.institution_id,
            "Created requisition"
        );
        Ok(requisition)
    }

    pub async fn delete_requisition(&self, requisition_id: &str) -> Result<()> {
        self.execute(
            Method::DELETE,
            &format!("{REQUISITIONS_PATH}{requisition_id}/"),
            None,
            None,
        )
        .await
        .map_err(|err| logged("delete requisition", err))?;
        tracing::info!(requisition_id, "Deleted requisition");
        Ok(())
    }

    /// Institutions available in `country` (ISO 3166 alpha-2).
    pub async fn list_institutions(&self, country: &str) -> Result<Vec<Institution>> {
        let country = country.trim().to_ascii_uppercase();
        self.get_json(&format!("/api/v2/institutions/?country={country}"), None)
            .await
            .map_err(|err| logged("list institutions", err))
    }

    pub async fn get_institution(&self, institution_id: &str) -> Result<Institution> {
        self.get_json(&format!("/api/v2/institutions/{institution_id}/"), None)
            .await
            .map_err(|err| logged("get institution", err))
    }

    /// Raw `{"account": {...}}` payload. Charged to the details quota.
    pub async fn account_details(&self, account_id: &str) -> Result<Value> {
        self.account_scope(account_id, Scope::Details).await
    }

    /// Raw `{"balances": [...]}` payload. Charged to the balances quota.
    pub async fn account_balances(&self, account_id: &str) -> Result<Value> {
        self.account_scope(account_id, Scope::Balances).await
    }

    /// Raw `{"transactions": {"booked": [...], "pending": [...]}}` payload.
    /// Charged to the transactions quota.
    pub async fn account_transactions(&self, account_id: &str) -> Result<Value> {
        self.account_scope(account_id, Scope::Transactions).await
    }

    /// Fetch one scope of account data.
    pub async fn account_scope(&self, account_id: &str, scope: Scope) -> Result<Value> {
        let quota = Quota::for_account(scope, account_id, self.limits());
        self.execute(
            Method::GET,
            &format!("/api/v2/accounts/{account_id}/{scope}/"),
            Some(&quota),
            None,
        )
        .await
        .map_err(|err| {
            if err.is_deferral() {
                tracing::debug!(account_id, %scope, "Quota exhausted, deferring fetch");
                err
            } else {
                logged(&format!("fetch account {scope}"), err)
            }
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, quota: Option<&Quota>) -> Result<T> {
        let value = self.execute(Method::GET, path, quota, None).await?;
        decode(value, path)
    }

    /// Path part of an absolute link on this client's host.
    fn relative_path(&self, link: &str) -> Option<String> {
        if link.starts_with('/') {
            return Some(link.to_string());
        }
        link.strip_prefix(self.base_url())
            .filter(|rest| rest.starts_with('/'))
            .map(str::to_string)
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| BankDataError::InvalidResponse(format!("unexpected {what} payload: {err}")))
}

fn logged(operation: &str, err: BankDataError) -> BankDataError {
    tracing::error!(error = %err, "Failed to {operation}");
    err
}
