//! Display-ready readings derived from a refresh snapshot.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::refresh::{AccountRecord, RefreshSnapshot};

/// State shown for details that were never fetched.
pub const NOT_LOADED: &str = "Not loaded";

/// Current balance of one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceReading {
    pub unique_id: String,
    pub name: String,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub attributes: BTreeMap<String, Value>,
}

/// Identity of one account: IBAN, else account name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailsReading {
    pub unique_id: String,
    pub name: String,
    pub state: String,
    pub attributes: BTreeMap<String, Value>,
}

/// Both readings for one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReadings {
    pub balance: BalanceReading,
    pub details: DetailsReading,
}

/// Readings for every account in the snapshot, in account id order.
pub fn readings(snapshot: &RefreshSnapshot) -> Vec<AccountReadings> {
    snapshot
        .accounts
        .values()
        .map(|record| AccountReadings {
            balance: balance_reading(snapshot, record),
            details: details_reading(snapshot, record),
        })
        .collect()
}

pub fn balance_reading(snapshot: &RefreshSnapshot, record: &AccountRecord) -> BalanceReading {
    let first = first_balance(record);
    let amount_field = |field: &str| {
        first
            .and_then(|b| b.get("balanceAmount"))
            .and_then(|amount| amount.get(field))
    };
    let amount = amount_field("amount").and_then(|v| match v {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    });
    let currency = amount_field("currency")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut attributes = base_attributes(record);
    if let Some(balance) = first {
        attributes.insert("balance_type".into(), field_or_null(balance, "balanceType"));
        attributes.insert("reference_date".into(), field_or_null(balance, "referenceDate"));
    }

    BalanceReading {
        unique_id: format!("{}_balance", unique_base(record)),
        name: display_name(snapshot, record, "Balance"),
        amount,
        currency,
        attributes,
    }
}

pub fn details_reading(snapshot: &RefreshSnapshot, record: &AccountRecord) -> DetailsReading {
    let account = account_info(record);
    let state = match account {
        None => NOT_LOADED.to_string(),
        Some(info) => ["iban", "name"]
            .iter()
            .find_map(|field| non_empty_str(info, field))
            .unwrap_or("Unknown")
            .to_string(),
    };

    let mut attributes = base_attributes(record);
    if let Some(info) = account {
        for (attr, field) in [
            ("iban", "iban"),
            ("name", "name"),
            ("currency", "currency"),
            ("owner_name", "ownerName"),
            ("status", "status"),
        ] {
            attributes.insert(attr.into(), field_or_null(info, field));
        }
    }

    DetailsReading {
        unique_id: format!("{}_details", unique_base(record)),
        name: display_name(snapshot, record, "Details"),
        state,
        attributes,
    }
}

/// `"{institution} {account} {suffix}"`, degrading gracefully as parts are
/// unknown.
pub fn display_name(snapshot: &RefreshSnapshot, record: &AccountRecord, suffix: &str) -> String {
    let account_name = account_info(record).and_then(|info| non_empty_str(info, "name"));
    let institution = institution_label(snapshot, &record.institution_id);
    let tail = last4(&record.id);
    match (institution, account_name) {
        (Some(inst), Some(name)) => format!("{inst} {name} {suffix}"),
        (None, Some(name)) => format!("{name} {suffix}"),
        (Some(inst), None) => format!("{inst} Account {tail} {suffix}"),
        (None, None) => format!("Account {tail} {suffix}"),
    }
}

/// Cached institution name, else a title-cased guess from the id prefix
/// (`"REVOLUT_REVOGB21"` becomes `"Revolut"`).
fn institution_label(snapshot: &RefreshSnapshot, institution_id: &str) -> Option<String> {
    if institution_id.is_empty() {
        return None;
    }
    if let Some(name) = snapshot.institution_name(institution_id) {
        return Some(name.to_string());
    }
    let prefix = institution_id.split('_').next().unwrap_or(institution_id);
    let mut chars = prefix.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
}

fn unique_base(record: &AccountRecord) -> &str {
    account_info(record)
        .and_then(|info| non_empty_str(info, "resourceId"))
        .unwrap_or(&record.id)
}

fn account_info(record: &AccountRecord) -> Option<&Value> {
    record.details.as_ref()?.get("account")
}

fn first_balance(record: &AccountRecord) -> Option<&Value> {
    record.balances.as_ref()?.get("balances")?.as_array()?.first()
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn field_or_null(value: &Value, field: &str) -> Value {
    value.get(field).cloned().unwrap_or(Value::Null)
}

fn base_attributes(record: &AccountRecord) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("account_id".to_string(), Value::from(record.id.clone())),
        (
            "requisition_id".to_string(),
            Value::from(record.requisition_id.clone()),
        ),
        (
            "institution_id".to_string(),
            Value::from(record.institution_id.clone()),
        ),
    ])
}

fn last4(id: &str) -> &str {
    let start = id
        .char_indices()
        .rev()
        .nth(3)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &id[start..]
}
