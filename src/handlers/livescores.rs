use axum::{extract::State, routing::get, Router};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/livescores", get(livescores))
}

/// Cached passthrough to the live-score upstream.
pub async fn livescores(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let scores = state.livescore.get_scores().await?;
    Ok(Json(scores))
}
