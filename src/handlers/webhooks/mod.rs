pub mod common;
pub mod stripe;

pub use stripe::handle_stripe_webhook;

use axum::{routing::post, Router};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/stripe/webhooks", post(handle_stripe_webhook))
}
