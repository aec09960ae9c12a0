//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::util::ServiceExt;

use reserva::auth::Argon2Hasher;
use reserva::cache::MemoryCache;
use reserva::domain::Account;
use reserva::handlers::{AdjustSupplyCommand, CreateAccountCommand, RegisterBankCommand};
use reserva::store::MemoryLedgerStore;
use reserva::{api, AppState, EngineSettings, OperationContext, Principal};

pub const ADMIN: &str = "central";
pub const PASSWORD: &str = "correct-horse-battery";

/// In-memory ledger with a seeded administrator bank.
pub struct TestLedger {
    pub state: AppState,
    pub store: Arc<MemoryLedgerStore>,
    pub cache: Arc<MemoryCache>,
    pub admin: Principal,
}

pub async fn setup_ledger() -> TestLedger {
    setup_ledger_with(None, EngineSettings::default()).await
}

pub async fn setup_ledger_with(latency: Option<Duration>, settings: EngineSettings) -> TestLedger {
    let store = Arc::new(match latency {
        Some(latency) => MemoryLedgerStore::with_latency(latency),
        None => MemoryLedgerStore::new(),
    });
    let cache = Arc::new(MemoryCache::new());

    let state = AppState::new(
        store.clone(),
        cache.clone(),
        cache.clone(),
        Arc::new(Argon2Hasher::low_cost()),
        settings,
        "test",
    );

    let admin = state
        .banks
        .register_unchecked(
            RegisterBankCommand::new(ADMIN, PASSWORD).as_admin(),
            &OperationContext::new(),
        )
        .await
        .expect("Failed to seed admin bank")
        .principal();

    TestLedger {
        state,
        store,
        cache,
        admin,
    }
}

impl TestLedger {
    pub fn router(&self) -> Router {
        api::build_router(self.state.clone())
    }

    pub async fn register_bank(&self, username: &str) -> Principal {
        self.state
            .banks
            .register(
                &self.admin,
                RegisterBankCommand::new(username, PASSWORD),
                &OperationContext::new(),
            )
            .await
            .expect("Failed to register bank")
            .principal()
    }

    /// Open an account for `owner` and fund it through a supply adjustment.
    pub async fn open_account(&self, owner: &Principal, cents: i64) -> Account {
        let ctx = OperationContext::new();
        let account = self
            .state
            .accounts
            .create(owner, CreateAccountCommand::new(r#"{"holder":"test"}"#), &ctx)
            .await
            .expect("Failed to create account");
        if cents == 0 {
            return account;
        }
        self.state
            .accounts
            .adjust_supply(&self.admin, AdjustSupplyCommand::new(account.id, cents), &ctx)
            .await
            .expect("Failed to fund account")
    }

    pub async fn token_for(&self, username: &str) -> String {
        self.state
            .directory
            .issue_token(username, PASSWORD)
            .await
            .expect("Failed to issue token")
            .plaintext
    }
}

/// Send a request through `app` and decode the JSON body.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Connect to `DATABASE_URL`, apply migrations and empty every table.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    reserva::db::migrate(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("TRUNCATE TABLE transfers, accounts, banks RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}
