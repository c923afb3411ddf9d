//! Interactive bank-linking flow.
//!
//! ```text
//! AwaitingCountry -> AwaitingInstitution -> AwaitingBankRedirect
//!     -> VerifyingLink -> Done | Aborted(reason)
//! ```
//!
//! Recoverable problems (an unknown country, a failed lookup) are returned
//! as [`StepError`] and leave the state unchanged so the step can be retried.
//! Terminal problems move the wizard to [`LinkState::Aborted`].

use strum::Display;
use thiserror::Error;
use uuid::Uuid;

use crate::api::{BankDataClient, Institution, NewRequisition, RequisitionStatus};
use crate::config::BankDataConfig;

/// Path the provider redirects back to once the user leaves the bank.
pub const CALLBACK_PATH: &str = "/api/bankdata/callback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AbortReason {
    MissingConfiguration,
    RequisitionFailed,
    AuthorizationPending,
    AuthorizationFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    AwaitingCountry,
    AwaitingInstitution {
        country: String,
        institutions: Vec<Institution>,
    },
    AwaitingBankRedirect {
        institution: Institution,
        requisition_id: String,
        link: String,
    },
    VerifyingLink {
        requisition_id: String,
    },
    Done {
        requisition_id: String,
        accounts: Vec<String>,
    },
    Aborted(AbortReason),
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCountry => "awaiting_country",
            Self::AwaitingInstitution { .. } => "awaiting_institution",
            Self::AwaitingBankRedirect { .. } => "awaiting_bank_redirect",
            Self::VerifyingLink { .. } => "verifying_link",
            Self::Done { .. } => "done",
            Self::Aborted(_) => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Aborted(_))
    }
}

/// A step failed but may be retried from the same state.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Invalid country code {0:?}")]
    InvalidCountry(String),
    #[error("No institutions available in {0}")]
    NoInstitutions(String),
    #[error("Cannot connect: {0}")]
    CannotConnect(String),
    #[error("Unknown institution {0:?}")]
    InvalidInstitution(String),
    #[error("Requisition failed: {0}")]
    RequisitionFailed(String),
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
}

/// One linking session.
#[derive(Debug)]
pub struct LinkWizard {
    client: BankDataClient,
    flow_id: String,
    callback_base_url: Option<String>,
    reference_prefix: String,
    state: LinkState,
}

impl LinkWizard {
    pub fn new(client: BankDataClient, config: &BankDataConfig) -> Self {
        Self {
            client,
            flow_id: Uuid::new_v4().to_string(),
            callback_base_url: config
                .callback_base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            reference_prefix: config.reference_prefix.clone(),
            state: LinkState::AwaitingCountry,
        }
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = flow_id.into();
        self
    }

    pub fn with_callback_base_url(mut self, url: impl Into<String>) -> Self {
        self.callback_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Where the provider sends the user after authorization.
    pub fn redirect_url(&self) -> Option<String> {
        self.callback_base_url
            .as_ref()
            .map(|base| format!("{base}{CALLBACK_PATH}?flow_id={}", self.flow_id))
    }

    pub fn reference(&self) -> String {
        format!("{}{}", self.reference_prefix, self.flow_id)
    }

    /// Bank authorization link, once a requisition exists.
    pub fn authorization_link(&self) -> Option<&str> {
        match &self.state {
            LinkState::AwaitingBankRedirect { link, .. } => Some(link),
            _ => None,
        }
    }

    /// Choose the country and load its institutions. May be repeated to
    /// switch country before an institution is picked.
    pub async fn select_country(&mut self, country: &str) -> Result<&LinkState, StepError> {
        self.expect_state(
            matches!(
                self.state,
                LinkState::AwaitingCountry | LinkState::AwaitingInstitution { .. }
            ),
            "select a country",
        )?;

        let country = country.trim().to_ascii_uppercase();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(StepError::InvalidCountry(country));
        }

        let institutions = self
            .client
            .list_institutions(&country)
            .await
            .map_err(|err| StepError::CannotConnect(err.to_string()))?;
        if institutions.is_empty() {
            return Err(StepError::NoInstitutions(country));
        }

        tracing::debug!(flow_id = %self.flow_id, %country, count = institutions.len(), "Loaded institutions");
        self.state = LinkState::AwaitingInstitution {
            country,
            institutions,
        };
        Ok(&self.state)
    }

    /// Choose the institution and create the requisition.
    pub async fn select_institution(&mut self, institution_id: &str) -> Result<&LinkState, StepError> {
        let LinkState::AwaitingInstitution { institutions, .. } = &self.state else {
            return Err(self.invalid_transition("select an institution"));
        };
        let institution = institutions
            .iter()
            .find(|inst| inst.id == institution_id)
            .cloned()
            .ok_or_else(|| StepError::InvalidInstitution(institution_id.to_string()))?;

        let Some(redirect) = self.redirect_url() else {
            tracing::error!(flow_id = %self.flow_id, "No callback base URL configured");
            self.state = LinkState::Aborted(AbortReason::MissingConfiguration);
            return Ok(&self.state);
        };

        let request = NewRequisition::new(&institution.id, redirect).with_reference(self.reference());
        let requisition = self
            .client
            .create_requisition(&request)
            .await
            .map_err(|err| StepError::RequisitionFailed(err.to_string()))?;
        let Some(link) = requisition.link.filter(|link| !link.is_empty()) else {
            return Err(StepError::RequisitionFailed(format!(
                "requisition {} has no authorization link",
                requisition.id
            )));
        };

        tracing::info!(
            flow_id = %self.flow_id,
            requisition_id = %requisition.id,
            institution = %institution.name,
            "Awaiting bank authorization"
        );
        self.state = LinkState::AwaitingBankRedirect {
            institution,
            requisition_id: requisition.id,
            link,
        };
        Ok(&self.state)
    }

    /// Check the requisition after the user came back from the bank.
    pub async fn complete(&mut self) -> Result<&LinkState, StepError> {
        let LinkState::AwaitingBankRedirect { requisition_id, .. } = &self.state else {
            return Err(self.invalid_transition("complete the link"));
        };
        let requisition_id = requisition_id.clone();
        self.state = LinkState::VerifyingLink {
            requisition_id: requisition_id.clone(),
        };

        self.state = match self.client.get_requisition(&requisition_id).await {
            Ok(requisition) => match requisition.status {
                RequisitionStatus::Linked => {
                    tracing::info!(requisition_id = %requisition_id, "Requisition linked");
                    LinkState::Done {
                        requisition_id,
                        accounts: requisition.accounts,
                    }
                }
                status if status.is_pending() => {
                    tracing::warn!(requisition_id = %requisition_id, %status, "Authorization still pending");
                    LinkState::Aborted(AbortReason::AuthorizationPending)
                }
                status => {
                    tracing::error!(requisition_id = %requisition_id, %status, "Authorization failed");
                    LinkState::Aborted(AbortReason::AuthorizationFailed)
                }
            },
            Err(_) => LinkState::Aborted(AbortReason::RequisitionFailed),
        };
        Ok(&self.state)
    }

    fn expect_state(&self, ok: bool, action: &'static str) -> Result<(), StepError> {
        if ok {
            Ok(())
        } else {
            Err(self.invalid_transition(action))
        }
    }

    fn invalid_transition(&self, action: &'static str) -> StepError {
        StepError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }
}
