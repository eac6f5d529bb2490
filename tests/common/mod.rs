//! Test utilities and fixtures for Pitchside integration tests

#![allow(dead_code)]

use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::sync::Arc;
use std::time::Duration;

pub use pitchside::db::{init_db, queries, AppState, DbPool};
pub use pitchside::handlers;
pub use pitchside::livescore::LiveScoreCache;
pub use pitchside::models::*;
pub use pitchside::payments::StripeConfig;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test123secret456";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn test_stripe_config() -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_xxx".to_string(),
        webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
    }
}

/// Create an AppState backed by a single shared in-memory database.
///
/// The pool is capped at one connection so every caller sees the same
/// `:memory:` database. Tests must not hold a pooled connection across a
/// request or the handler will starve; scope setup connections tightly.
pub fn create_test_app_state() -> AppState {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        base_url: "http://localhost:3000".to_string(),
        success_page_url: "http://localhost:3000/success".to_string(),
        stripe: Some(test_stripe_config()),
        livescore: Arc::new(LiveScoreCache::new(None, None)),
    }
}

/// An AppState whose pool cannot hand out connections: the only connection
/// is checked out and parked in the returned guard. `pool.get()` then times
/// out quickly, which is how the degraded status path is exercised.
pub fn create_broken_app_state() -> (AppState, r2d2::PooledConnection<SqliteConnectionManager>) {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .connection_timeout(Duration::from_millis(100))
        .build(manager)
        .unwrap();
    let held = pool.get().unwrap();
    init_db(&held).unwrap();

    let state = AppState {
        db: pool,
        base_url: "http://localhost:3000".to_string(),
        success_page_url: "http://localhost:3000/success".to_string(),
        stripe: Some(test_stripe_config()),
        livescore: Arc::new(LiveScoreCache::new(None, None)),
    };
    (state, held)
}

/// Full application router without rate limiting.
pub fn test_app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::health_router())
        .merge(handlers::checkout::router(state.clone()))
        .merge(handlers::subscriptions::router(state.clone()))
        .merge(handlers::orders::router(state.clone()))
        .merge(handlers::livescores::router())
        .merge(handlers::webhooks::router())
        .merge(handlers::admin::router(state.clone()))
        .with_state(state)
}

/// Create a test user, returning the stored row (with session token).
pub fn create_test_user(state: &AppState, email: &str, is_admin: bool) -> User {
    let conn = state.db.get().unwrap();
    queries::create_user(
        &conn,
        &CreateUser {
            email: email.to_string(),
            name: format!("Test User {}", email),
            is_admin,
        },
    )
    .expect("Failed to create test user")
}

/// Create a test product with the given stock.
pub fn create_test_product(state: &AppState, name: &str, price_cents: i64, stock: i64) -> Product {
    let mut conn = state.db.get().unwrap();
    queries::create_product(
        &mut conn,
        &CreateProduct {
            name: name.to_string(),
            description: None,
            price_cents,
            currency: "eur".to_string(),
            stock,
            image_url: None,
            variations: vec![],
        },
    )
    .expect("Failed to create test product")
}

/// Compute a valid `stripe-signature` header for a payload.
pub fn stripe_signature_header(payload: &[u8]) -> String {
    signature_header_with(payload, TEST_WEBHOOK_SECRET, now())
}

/// Signature header with an explicit secret and timestamp, for tamper and
/// staleness tests.
pub fn signature_header_with(payload: &[u8], secret: &str, timestamp: i64) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Read a response body into JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).expect("Response should be valid JSON")
}
