use axum::{
    extract::State,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::middleware::require_admin;
use crate::models::{CreateProduct, Product, ProductVariation, UpdateProduct, User};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/admin/products", post(create_product))
        .route("/api/admin/products", get(list_products))
        .route("/api/admin/products/{product_id}", get(get_product))
        .route("/api/admin/products/{product_id}", put(update_product))
        .route("/api/admin/products/{product_id}", delete(delete_product))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/reconciliation", get(reconciliation_report))
        .layer(middleware::from_fn_with_state(state, require_admin))
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: Product,
    pub variations: Vec<ProductVariation>,
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProduct>,
) -> Result<Json<ProductResponse>> {
    request.validate()?;

    let mut conn = state.db.get()?;
    let product = queries::create_product(&mut conn, &request)?;
    let variations = queries::list_product_variations(&conn, &product.id)?;

    tracing::info!("product created: id={} name={}", product.id, product.name);

    Ok(Json(ProductResponse {
        product,
        variations,
    }))
}

pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_products(&conn)?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<ProductResponse>> {
    let conn = state.db.get()?;

    let product =
        queries::get_product_by_id(&conn, &product_id)?.or_not_found(msg::PRODUCT_NOT_FOUND)?;
    let variations = queries::list_product_variations(&conn, &product.id)?;

    Ok(Json(ProductResponse {
        product,
        variations,
    }))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(request): Json<UpdateProduct>,
) -> Result<Json<Product>> {
    request.validate()?;

    let conn = state.db.get()?;
    let product = queries::update_product(&conn, &product_id, &request)?
        .or_not_found(msg::PRODUCT_NOT_FOUND)?;

    Ok(Json(product))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let conn = state.db.get()?;

    if !queries::soft_delete_product(&conn, &product_id)? {
        return Err(crate::error::AppError::NotFound(msg::PRODUCT_NOT_FOUND.into()));
    }

    tracing::info!("product soft-deleted: id={}", product_id);

    Ok(Json(DeleteResponse { deleted: true }))
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_users(&conn)?))
}

#[derive(Debug, Deserialize)]
pub struct ReconciliationParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// Webhook events that were acknowledged but never applied (unknown user,
/// unmatched order). The operator works through this list by hand.
pub async fn reconciliation_report(
    State(state): State<AppState>,
    Query(params): Query<ReconciliationParams>,
) -> Result<Json<Vec<queries::UnmatchedEvent>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_unmatched_events(
        &conn,
        params.limit.clamp(1, 1_000),
    )?))
}
