use axum::{extract::State, middleware, routing::get, Extension, Router};
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{msg, OptionExt, Result};
use crate::extractors::{Json, Path};
use crate::middleware::{user_auth, UserContext};
use crate::models::{Order, OrderItem};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/orders/{order_id}", get(get_order))
        .layer(middleware::from_fn_with_state(state, user_auth))
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Order lookup for the redirect-back page. A `pending` status means the
/// webhook has not landed yet and the client should poll.
pub async fn get_order(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderResponse>> {
    let conn = state.db.get()?;

    // Scoped to the caller; other users' orders look like 404s.
    let order = queries::get_order_for_user(&conn, &order_id, &ctx.user.id)?
        .or_not_found(msg::ORDER_NOT_FOUND)?;
    let items = queries::list_order_items(&conn, &order.id)?;

    Ok(Json(OrderResponse { order, items }))
}
