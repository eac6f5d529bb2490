use axum::{
    extract::State,
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Extension, Router,
};
use chrono::Utc;
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::extractors::Json;
use crate::middleware::{user_auth, UserContext};
use crate::models::{FreeSubscriptionRequest, Plan, PlanDuration, Subscription};
use crate::util::extract_bearer_token;

const SECONDS_PER_DAY: i64 = 86_400;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/subscriptions", get(list_subscriptions))
        .route("/api/subscriptions/free", post(activate_free))
        .route("/api/subscriptions/cancel", post(cancel_subscription))
        .layer(middleware::from_fn_with_state(state, user_auth))
        // Status authenticates by hand so a broken pool can degrade
        // instead of bouncing off the auth middleware with a 500.
        .route("/api/subscriptions/status", get(subscription_status))
}

/// Subscription fields exposed by the status endpoint. Synthetic entries
/// (degraded mode) have no row behind them, hence no ids here.
#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub plan: String,
    pub duration: String,
    pub is_active: bool,
    pub started_at: i64,
    pub expires_at: i64,
}

impl From<Subscription> for SubscriptionView {
    fn from(sub: Subscription) -> Self {
        Self {
            plan: sub.plan,
            duration: sub.duration,
            is_active: sub.is_active,
            started_at: sub.started_at,
            expires_at: sub.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub subscription: Option<SubscriptionView>,
    pub status: &'static str,
    pub degraded: bool,
}

fn degraded_status(now: i64) -> StatusResponse {
    StatusResponse {
        subscription: Some(SubscriptionView {
            plan: Plan::Free.as_str().to_string(),
            duration: PlanDuration::OneMonth.as_str().to_string(),
            is_active: true,
            started_at: now,
            expires_at: now + 30 * SECONDS_PER_DAY,
        }),
        status: "degraded",
        degraded: true,
    }
}

/// Current subscription for the bearer of the session token.
///
/// When the database is unreachable this answers with a synthetic free
/// trial instead of a 500: a storage outage must not lock paying users out
/// of the product, and the flag tells clients the answer is provisional.
pub async fn subscription_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>> {
    let token = extract_bearer_token(&headers).ok_or(AppError::Unauthorized)?;

    let now = Utc::now().timestamp();

    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!("subscription status degraded, pool unavailable: {}", err);
            return Ok(Json(degraded_status(now)));
        }
    };

    let user = match queries::get_user_by_session_token(&conn, token) {
        Ok(Some(user)) => user,
        Ok(None) => return Err(AppError::Unauthorized),
        Err(err) if err.is_storage_unavailable() => {
            tracing::error!("subscription status degraded, query failed: {}", err);
            return Ok(Json(degraded_status(now)));
        }
        Err(err) => return Err(err),
    };

    let subscription = match queries::find_active_subscription(&conn, &user.id, now) {
        Ok(sub) => sub,
        Err(err) if err.is_storage_unavailable() => {
            tracing::error!("subscription status degraded, query failed: {}", err);
            return Ok(Json(degraded_status(now)));
        }
        Err(err) => return Err(err),
    };

    Ok(Json(match subscription {
        Some(sub) => StatusResponse {
            subscription: Some(sub.into()),
            status: "active",
            degraded: false,
        },
        None => StatusResponse {
            subscription: None,
            status: "none",
            degraded: false,
        },
    }))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<Vec<Subscription>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_subscriptions_for_user(
        &conn,
        &ctx.user.id,
    )?))
}

/// Activate the 30-day free plan. Refused while a live subscription exists,
/// so it cannot clobber a paid plan.
pub async fn activate_free(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<FreeSubscriptionRequest>,
) -> Result<Json<Subscription>> {
    let plan: Plan = request
        .plan
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_PLAN.into()))?;
    if plan != Plan::Free {
        return Err(AppError::BadRequest(msg::INVALID_PLAN.into()));
    }
    let duration: PlanDuration = request
        .duration
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_PLAN.into()))?;
    // The free plan is a 30-day trial, never a longer grant.
    if duration != PlanDuration::OneMonth {
        return Err(AppError::BadRequest(msg::INVALID_PLAN.into()));
    }

    let now = Utc::now().timestamp();
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if queries::find_active_subscription(&tx, &ctx.user.id, now)?.is_some() {
        return Err(AppError::Conflict(msg::ACTIVE_SUBSCRIPTION_EXISTS.into()));
    }
    // Expired rows can still be flagged active; clear them so the partial
    // unique index accepts the new row.
    queries::deactivate_subscriptions_for_user(&tx, &ctx.user.id)?;

    let subscription = queries::create_subscription(
        &tx,
        &ctx.user.id,
        plan.as_str(),
        duration.as_str(),
        now,
        now + duration.days() * SECONDS_PER_DAY,
        None,
    )?;
    queries::set_user_subscribed(&tx, &ctx.user.id, true)?;
    tx.commit()?;

    tracing::info!(
        "free subscription activated: user={} duration={}",
        ctx.user.id,
        duration
    );

    Ok(Json(subscription))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: usize,
}

/// Deactivate the caller's subscriptions locally. Stripe-side cancellation
/// arrives separately as a `customer.subscription.deleted` event.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<CancelResponse>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let cancelled = queries::deactivate_subscriptions_for_user(&tx, &ctx.user.id)?;
    queries::set_user_subscribed(&tx, &ctx.user.id, false)?;
    tx.commit()?;

    tracing::info!(
        "subscription cancelled locally: user={} rows={}",
        ctx.user.id,
        cancelled
    );

    Ok(Json(CancelResponse { cancelled }))
}
