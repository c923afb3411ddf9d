#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use bankdata::api::BankDataClient;
use bankdata::config::{BankDataConfig, Credentials, RateLimits};
use bankdata::store::{MemoryStateStore, StateStore};
use bankdata::util::{Clock, ManualClock};
use chrono::Duration;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SECRET_ID: &str = "test-secret-id";
pub const SECRET_KEY: &str = "test-secret-key";

/// Mock provider plus a client wired to it through an in-memory store.
pub struct Harness {
    pub server: MockServer,
    pub store: Arc<MemoryStateStore>,
    pub clock: ManualClock,
    pub config: BankDataConfig,
    pub client: BankDataClient,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_limits(RateLimits::default()).await
    }

    pub async fn with_limits(limits: RateLimits) -> Self {
        let server = MockServer::start().await;
        let config = config_for(&server, limits);
        let store = Arc::new(MemoryStateStore::new());
        let clock = ManualClock::new();
        let client = client_for(&config, store.clone(), &clock);
        Self {
            server,
            store,
            clock,
            config,
            client,
        }
    }

    /// A second client sharing this harness's store and clock, as after a
    /// restart.
    pub fn restarted_client(&self) -> BankDataClient {
        client_for(&self.config, self.store.clone(), &self.clock)
    }

    /// Persist a token pair expiring `access_in` / `refresh_in` from now.
    pub fn seed_tokens(&self, access: &str, access_in: Duration, refresh: &str, refresh_in: Duration) {
        let now = self.clock.now();
        self.store
            .save(
                &self.config.client_state_key(),
                &json!({
                    "tokens": {
                        "access_token": access,
                        "access_expiry": now + access_in,
                        "refresh_token": refresh,
                        "refresh_expiry": now + refresh_in,
                    },
                    "rate_limits": {}
                }),
            )
            .unwrap();
    }

    pub fn seed_accounts(&self, cache: Value) {
        self.store
            .save(&self.config.account_cache_key(), &cache)
            .unwrap();
    }

    pub fn cached_accounts(&self) -> Value {
        self.store
            .load(&self.config.account_cache_key())
            .unwrap()
            .unwrap_or(Value::Null)
    }
}

pub fn config_for(server: &MockServer, rate_limits: RateLimits) -> BankDataConfig {
    BankDataConfig::builder()
        .base_url(server.uri())
        .credentials(Credentials::new(SECRET_ID, SECRET_KEY))
        .rate_limits(rate_limits)
        .request_timeout(StdDuration::from_secs(5))
        .callback_base_url("https://home.example")
        .build()
}

pub fn client_for(
    config: &BankDataConfig,
    store: Arc<MemoryStateStore>,
    clock: &ManualClock,
) -> BankDataClient {
    BankDataClient::with_clock(config, store, Arc::new(clock.clone())).unwrap()
}

pub fn new_token_body(access: &str) -> Value {
    json!({
        "access": access,
        "access_expires": 86400,
        "refresh": format!("{access}-refresh"),
        "refresh_expires": 2592000
    })
}

/// Token endpoint handing out `access`, expected to be hit `times` times.
pub async fn mount_new_token(server: &MockServer, access: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v2/token/new/"))
        .and(body_json(json!({"secret_id": SECRET_ID, "secret_key": SECRET_KEY})))
        .respond_with(ResponseTemplate::new(200).set_body_json(new_token_body(access)))
        .expect(times)
        .mount(server)
        .await;
}

pub fn requisition(id: &str, status: &str, institution: &str, accounts: &[&str]) -> Value {
    json!({
        "id": id,
        "status": status,
        "institution_id": institution,
        "accounts": accounts,
        "link": format!("https://ob.example/psd2/start/{id}"),
        "reference": format!("bankdata_{id}"),
        "redirect": "https://home.example/api/bankdata/callback",
        "created": "2024-05-01T10:00:00.000000Z"
    })
}

pub async fn mount_requisitions(server: &MockServer, results: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v2/requisitions/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": results.len(),
            "next": null,
            "previous": null,
            "results": results
        })))
        .mount(server)
        .await;
}

pub async fn mount_institution(server: &MockServer, id: &str, name: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v2/institutions/{id}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "name": name,
            "bic": "SFIN0000",
            "transaction_total_days": "90",
            "countries": ["GB"],
            "logo": "https://cdn.example/logo.png"
        })))
        .expect(times)
        .mount(server)
        .await;
}

pub fn details_body(account_id: &str, iban: &str, name: &str) -> Value {
    json!({"account": {
        "resourceId": format!("res-{account_id}"),
        "iban": iban,
        "currency": "EUR",
        "ownerName": "Sam Doe",
        "name": name
    }})
}

pub fn balances_body(amount: &str) -> Value {
    json!({"balances": [{
        "balanceAmount": {"amount": amount, "currency": "EUR"},
        "balanceType": "interimAvailable",
        "referenceDate": "2024-05-01"
    }]})
}

/// Account scope endpoint answering `status` with `body`, hit `times` times.
pub async fn mount_account_scope(
    server: &MockServer,
    account_id: &str,
    scope: &str,
    status: u16,
    body: Value,
    times: u64,
) {
    Mock::given(method("GET"))
        .and(path(format!("/api/v2/accounts/{account_id}/{scope}/")))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}
