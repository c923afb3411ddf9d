mod support;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use bankdata::api::BankDataClient;
use bankdata::config::RateLimits;
use bankdata::error::BankDataError;
use bankdata::ratelimit::Scope;
use bankdata::refresh::RefreshOrchestrator;
use bankdata::store::{FileStateStore, StateStore};
use bankdata::util::Clock;
use chrono::Duration;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use support::{
    balances_body, details_body, mount_account_scope, mount_institution, mount_new_token,
    mount_requisitions, requisition, Harness,
};

fn orchestrator(h: &Harness) -> RefreshOrchestrator {
    orchestrator_with(h, h.client.clone())
}

fn orchestrator_with(h: &Harness, client: BankDataClient) -> RefreshOrchestrator {
    let store: Arc<dyn StateStore> = h.store.clone();
    RefreshOrchestrator::new(client, store, &h.config)
}

fn cached(h: &Harness, account: &str, scope: &str) -> serde_json::Value {
    h.cached_accounts()["accounts"][account][scope].clone()
}

#[tokio::test]
async fn first_cycle_backfills_details_and_balances() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    mount_account_scope(&h.server, "A1", "balances", 200, balances_body("12.50"), 1).await;

    let snapshot = orchestrator(&h).refresh().await.unwrap();

    let record = &snapshot.accounts["A1"];
    assert_eq!(record.requisition_id, "req-1");
    assert_eq!(record.details, Some(details_body("A1", "DE001", "Main")));
    assert_eq!(record.balances, Some(balances_body("12.50")));
    assert_eq!(record.transactions, None);
    assert_eq!(snapshot.institution_name("BANK_X"), Some("Bank X"));
    assert_eq!(cached(&h, "A1", "balances"), balances_body("12.50"));
}

#[tokio::test]
async fn new_account_is_fetched_without_touching_existing_ones() {
    let h = Harness::start().await;
    let loaded_at = h.clock.now() - Duration::hours(1);
    h.seed_accounts(json!({
        "accounts": {
            "A1": {
                "id": "A1", "requisition_id": "req-1", "institution_id": "BANK_X",
                "details": details_body("A1", "DE001", "Main"),
                "balances": balances_body("1.00"),
                "details_updated": loaded_at,
                "balances_updated": loaded_at
            }
        },
        "institution_names": {"BANK_X": "Bank X"}
    }));
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(
        &h.server,
        vec![requisition("req-1", "LN", "BANK_X", &["A1", "A2"])],
    )
    .await;
    mount_institution(&h.server, "BANK_X", "Bank X", 0).await;
    mount_account_scope(&h.server, "A1", "details", 200, json!({}), 0).await;
    mount_account_scope(&h.server, "A1", "balances", 200, json!({}), 0).await;
    mount_account_scope(&h.server, "A2", "details", 200, details_body("A2", "DE002", "Savings"), 1).await;
    mount_account_scope(&h.server, "A2", "balances", 200, balances_body("99.00"), 1).await;

    let snapshot = orchestrator(&h).refresh().await.unwrap();

    assert_eq!(snapshot.accounts.len(), 2);
    assert_eq!(snapshot.accounts["A1"].balances, Some(balances_body("1.00")));
    assert_eq!(snapshot.accounts["A1"].balances_updated, Some(loaded_at));
    assert_eq!(snapshot.accounts["A2"].balances, Some(balances_body("99.00")));
}

#[tokio::test]
async fn quota_exhaustion_keeps_previous_data() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    mount_account_scope(&h.server, "A1", "balances", 500, json!({"summary": "boom"}), 1).await;

    let orchestrator = orchestrator(&h);
    let first = orchestrator.refresh().await.unwrap();
    assert!(first.accounts["A1"].details.is_some());
    assert!(first.accounts["A1"].balances.is_none());

    // Balances failed upstream but still used the single daily call, so the
    // second cycle defers it locally.
    let second = orchestrator.refresh().await.unwrap();
    assert_eq!(second.accounts["A1"].details, first.accounts["A1"].details);
    assert!(second.accounts["A1"].balances.is_none());
}

#[tokio::test]
async fn unauthorized_update_keeps_data_and_next_cycle_reauthenticates() {
    let h = Harness::start().await;
    h.seed_accounts(json!({
        "accounts": {"A1": {
            "id": "A1", "requisition_id": "req-1", "institution_id": "BANK_X",
            "details": details_body("A1", "DE001", "Main"),
            "balances": balances_body("1.00")
        }},
        "institution_names": {"BANK_X": "Bank X"}
    }));
    h.seed_tokens("stale", Duration::hours(2), "refresh-1", Duration::days(10));
    mount_account_scope(&h.server, "A1", "balances", 401, json!({"summary": "Invalid token"}), 1).await;
    Mock::given(method("POST"))
        .and(path("/api/v2/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "access-2", "access_expires": 86400})),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;

    let orchestrator = orchestrator(&h);
    let err = orchestrator
        .update_account_scope("A1", Scope::Balances)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(cached(&h, "A1", "balances"), balances_body("1.00"));

    let snapshot = orchestrator.refresh().await.unwrap();
    assert_eq!(snapshot.accounts["A1"].balances, Some(balances_body("1.00")));
    let tokens = h.client.tokens().tokens().await.unwrap().unwrap();
    assert_eq!(tokens.access_token.as_deref(), Some("access-2"));
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    mount_account_scope(&h.server, "A1", "balances", 200, balances_body("3.00"), 1).await;

    let orchestrator = orchestrator(&h);
    let first = orchestrator.refresh().await.unwrap();
    let second = orchestrator.refresh().await.unwrap();
    assert_eq!(first.accounts, second.accounts);
    assert_eq!(orchestrator.last_snapshot().await.unwrap().accounts, second.accounts);
}

#[tokio::test]
async fn only_linked_requisitions_contribute_accounts() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(
        &h.server,
        vec![
            requisition("req-1", "CR", "BANK_X", &["A1"]),
            requisition("req-2", "EX", "BANK_Y", &["A2"]),
        ],
    )
    .await;

    let snapshot = orchestrator(&h).refresh().await.unwrap();
    assert!(snapshot.accounts.is_empty());
    assert_eq!(snapshot.requisitions.len(), 2);
}

#[tokio::test]
async fn first_linked_requisition_wins_for_shared_accounts() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(
        &h.server,
        vec![
            requisition("req-1", "LN", "BANK_X", &["A1"]),
            requisition("req-2", "LN", "BANK_X", &["A1"]),
        ],
    )
    .await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    mount_account_scope(&h.server, "A1", "balances", 200, balances_body("3.00"), 1).await;

    let snapshot = orchestrator(&h).refresh().await.unwrap();
    assert_eq!(snapshot.accounts.len(), 1);
    assert_eq!(snapshot.accounts["A1"].requisition_id, "req-1");
}

#[tokio::test]
async fn absent_accounts_are_purged_after_three_cycles() {
    let h = Harness::start().await;
    h.seed_accounts(json!({
        "accounts": {"GONE": {
            "id": "GONE", "requisition_id": "req-old", "institution_id": "BANK_X",
            "balances": balances_body("7.00")
        }}
    }));
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![]).await;

    let orchestrator = orchestrator(&h);
    for missed in 1..=2u32 {
        let snapshot = orchestrator.refresh().await.unwrap();
        let record = &snapshot.accounts["GONE"];
        assert_eq!(record.missed_cycles, missed);
        assert!(!record.is_active());
        assert_eq!(record.balances, Some(balances_body("7.00")));
    }
    let snapshot = orchestrator.refresh().await.unwrap();
    assert!(snapshot.accounts.is_empty());
    assert_eq!(h.cached_accounts()["accounts"], json!({}));
}

#[tokio::test]
async fn requisition_failure_fails_the_cycle_and_keeps_last_snapshot() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/requisitions/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 0, "next": null, "results": []
        })))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/requisitions/"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&h.server)
        .await;

    let orchestrator = orchestrator(&h);
    let first = orchestrator.refresh().await.unwrap();

    let err = orchestrator.refresh().await.unwrap_err();
    assert!(matches!(err, BankDataError::RefreshFailed { .. }), "got {err:?}");
    assert_eq!(err.status(), Some(503));
    assert_eq!(
        orchestrator.last_snapshot().await.unwrap().refreshed_at,
        first.refreshed_at
    );
}

#[tokio::test]
async fn institution_names_are_looked_up_once() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(
        &h.server,
        vec![requisition("req-1", "LN", "BANK_X", &["A1", "A2"])],
    )
    .await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    for id in ["A1", "A2"] {
        mount_account_scope(&h.server, id, "details", 200, details_body(id, "DE0", "Acct"), 1).await;
        mount_account_scope(&h.server, id, "balances", 200, balances_body("1.00"), 1).await;
    }

    let orchestrator = orchestrator(&h);
    orchestrator.refresh().await.unwrap();
    let snapshot = orchestrator.refresh().await.unwrap();
    assert_eq!(snapshot.institution_name("BANK_X"), Some("Bank X"));
}

#[tokio::test]
async fn authentication_failure_during_backfill_aborts_after_saving() {
    let h = Harness::start().await;
    h.seed_tokens("access-1", Duration::hours(2), "refresh-1", Duration::days(10));
    h.seed_accounts(json!({
        "accounts": {},
        "institution_names": {"BANK_X": "Bank X"}
    }));
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_account_scope(&h.server, "A1", "details", 401, json!({"summary": "Invalid token"}), 1).await;
    Mock::given(method("POST"))
        .and(path("/api/v2/token/refresh/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/token/new/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"summary": "Authentication failed"})))
        .mount(&h.server)
        .await;

    let err = orchestrator(&h).refresh().await.unwrap_err();
    match &err {
        BankDataError::RefreshFailed { source } => {
            assert!(matches!(**source, BankDataError::Authentication(_)), "got {source:?}");
        }
        other => panic!("expected RefreshFailed, got {other:?}"),
    }
    // The merged account list was saved before aborting.
    assert_eq!(h.cached_accounts()["accounts"]["A1"]["requisition_id"], "req-1");
}

#[tokio::test]
async fn updating_an_unknown_account_is_rejected() {
    let h = Harness::start().await;
    let err = orchestrator(&h)
        .update_account_scope("NOPE", Scope::Balances)
        .await
        .unwrap_err();
    assert!(matches!(err, BankDataError::InvalidState(_)), "got {err:?}");
}

#[tokio::test]
async fn update_account_scope_replaces_payload_and_snapshot() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    mount_account_scope(&h.server, "A1", "balances", 200, balances_body("1.00"), 1).await;
    mount_account_scope(
        &h.server,
        "A1",
        "transactions",
        200,
        json!({"transactions": {"booked": [{"transactionId": "t1"}], "pending": []}}),
        1,
    )
    .await;

    let orchestrator = orchestrator(&h);
    orchestrator.refresh().await.unwrap();
    let value = orchestrator
        .update_account_scope("A1", Scope::Transactions)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["transactions"]["booked"][0]["transactionId"], "t1");

    let last = orchestrator.last_snapshot().await.unwrap();
    assert!(last.accounts["A1"].transactions.is_some());
    assert!(last.accounts["A1"].transactions_updated.is_some());
    assert_eq!(cached(&h, "A1", "transactions"), value);
}

#[tokio::test]
async fn cache_survives_a_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    mount_account_scope(&h.server, "A1", "balances", 200, balances_body("5.00"), 1).await;

    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(dir.path()));
    let client = BankDataClient::with_clock(&h.config, store.clone(), Arc::new(h.clock.clone())).unwrap();
    let first = RefreshOrchestrator::new(client, store, &h.config);
    let fresh = first.refresh().await.unwrap();
    drop(first);

    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(dir.path()));
    let client = BankDataClient::with_clock(&h.config, store.clone(), Arc::new(h.clock.clone())).unwrap();
    let reopened = RefreshOrchestrator::new(client, store, &h.config);
    let cached = reopened.cached_snapshot().unwrap();
    assert_eq!(cached.accounts, fresh.accounts);
    assert_eq!(cached.institution_name("BANK_X"), Some("Bank X"));
    assert!(cached.requisitions.is_empty());
}

#[tokio::test]
async fn upstream_429_is_not_retried_by_later_cycles() {
    let h = Harness::with_limits(RateLimits {
        details: 2,
        balances: 2,
        transactions: 3,
    })
    .await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    mount_account_scope(
        &h.server,
        "A1",
        "balances",
        429,
        json!({"summary": "Rate limit exceeded", "status_code": 429}),
        1,
    )
    .await;

    let orchestrator = orchestrator(&h);
    orchestrator.refresh().await.unwrap();
    let second = orchestrator.refresh().await.unwrap();
    assert!(second.accounts["A1"].balances.is_none());
    assert!(second.accounts["A1"].details.is_some());
}

#[tokio::test]
async fn interrupted_cycle_keeps_fields_already_fetched() {
    let h = Harness::start().await;
    mount_new_token(&h.server, "access-1", 1).await;
    mount_requisitions(&h.server, vec![requisition("req-1", "LN", "BANK_X", &["A1"])]).await;
    mount_institution(&h.server, "BANK_X", "Bank X", 1).await;
    mount_account_scope(&h.server, "A1", "details", 200, details_body("A1", "DE001", "Main"), 1).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/accounts/A1/balances/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(balances_body("4.00"))
                .set_delay(StdDuration::from_secs(3)),
        )
        .mount(&h.server)
        .await;

    // The cycle is dropped while the balances request is in flight.
    let orchestrator = orchestrator(&h);
    let outcome = tokio::time::timeout(StdDuration::from_millis(1000), orchestrator.refresh()).await;
    assert!(outcome.is_err());

    assert_eq!(cached(&h, "A1", "details"), details_body("A1", "DE001", "Main"));
    assert_eq!(cached(&h, "A1", "balances"), serde_json::Value::Null);

    // A restarted process starts from the saved details.
    let reopened = orchestrator_with(&h, h.restarted_client());
    assert!(reopened.cached_snapshot().unwrap().accounts["A1"].details.is_some());
}
