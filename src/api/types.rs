//! Wire types of the Bank Account Data API.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use strum::EnumString;

/// Lifecycle status of a requisition. Only `Linked` grants account access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RequisitionStatus {
    #[strum(serialize = "CR")]
    Created,
    #[strum(serialize = "UA")]
    UndergoingAuthentication,
    #[strum(serialize = "LN")]
    Linked,
    #[strum(default)]
    Other(String),
}

impl RequisitionStatus {
    pub fn as_code(&self) -> &str {
        match self {
            Self::Created => "CR",
            Self::UndergoingAuthentication => "UA",
            Self::Linked => "LN",
            Self::Other(code) => code,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked)
    }

    /// The end user has not finished authorizing yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Created | Self::UndergoingAuthentication)
    }
}

impl From<String> for RequisitionStatus {
    fn from(code: String) -> Self {
        code.parse().unwrap_or(Self::Other(code))
    }
}

impl From<RequisitionStatus> for String {
    fn from(status: RequisitionStatus) -> Self {
        status.as_code().to_string()
    }
}

impl fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// A consent session with one institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: String,
    pub status: RequisitionStatus,
    #[serde(default)]
    pub institution_id: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

/// A bank supported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bic: Option<String>,
    /// Days of transaction history available. Sent as a string by the API.
    #[serde(default, deserialize_with = "string_or_number")]
    pub transaction_total_days: Option<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

/// Body of a requisition creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRequisition {
    pub institution_id: String,
    pub redirect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_language: Option<String>,
}

impl NewRequisition {
    pub fn new(institution_id: impl Into<String>, redirect: impl Into<String>) -> Self {
        Self {
            institution_id: institution_id.into(),
            redirect: redirect.into(),
            reference: None,
            user_language: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
