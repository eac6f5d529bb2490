use axum::{extract::State, middleware, routing::post, Extension, Router};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::extractors::Json;
use crate::middleware::{user_auth, UserContext};
use crate::models::{plan_price_cents, CartItem, Plan, PlanDuration};
use crate::payments::{CheckoutLine, StripeClient};

/// VAT applied to cart subtotals, in percent.
const TAX_RATE_PERCENT: i64 = 21;
/// Flat shipping, waived above the free-shipping threshold.
const SHIPPING_CENTS: i64 = 499;
const FREE_SHIPPING_THRESHOLD_CENTS: i64 = 10_000;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/checkout/cart", post(cart_checkout))
        .route("/api/checkout/subscription", post(subscription_checkout))
        .layer(middleware::from_fn_with_state(state, user_auth))
}

#[derive(Debug, Deserialize)]
pub struct CartCheckoutRequest {
    pub items: Vec<CartItem>,
}

#[derive(Debug, Serialize)]
pub struct CartCheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
    pub order_id: String,
}

/// A cart line after validation, with no optional fields left.
struct ValidatedLine {
    product_id: Option<String>,
    name: String,
    amount: i64,
    quantity: i64,
    variation: Option<String>,
}

fn validate_items(items: &[CartItem]) -> Result<Vec<ValidatedLine>> {
    if items.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_CART.into()));
    }

    items
        .iter()
        .map(|item| {
            let name = item
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| AppError::BadRequest(msg::LINE_ITEM_NAME_MISSING.into()))?;
            let amount = item
                .amount
                .filter(|a| *a > 0)
                .ok_or_else(|| AppError::BadRequest(msg::LINE_ITEM_AMOUNT_MISSING.into()))?;
            let quantity = item
                .quantity
                .filter(|q| *q > 0)
                .ok_or_else(|| AppError::BadRequest(msg::LINE_ITEM_QUANTITY_MISSING.into()))?;

            Ok(ValidatedLine {
                product_id: item.product_id.clone(),
                name: name.to_string(),
                amount,
                quantity,
                variation: item.variation.clone(),
            })
        })
        .collect()
}

pub async fn cart_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<CartCheckoutRequest>,
) -> Result<Json<CartCheckoutResponse>> {
    let lines = validate_items(&request.items)?;

    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::Config(msg::STRIPE_NOT_CONFIGURED.into()))?;

    let currency = request
        .items
        .first()
        .and_then(|i| i.currency.clone())
        .unwrap_or_else(|| "eur".to_string());

    let subtotal: i64 = lines.iter().map(|l| l.amount * l.quantity).sum();
    let tax = subtotal * TAX_RATE_PERCENT / 100;
    let shipping = if subtotal >= FREE_SHIPPING_THRESHOLD_CENTS {
        0
    } else {
        SHIPPING_CENTS
    };

    // The order exists as `pending` before Stripe hears about it, so the
    // webhook always has a row to complete.
    let mut conn = state.db.get()?;
    let order = queries::create_order_with_items(
        &mut conn,
        &ctx.user.id,
        &queries::OrderTotals {
            subtotal_cents: subtotal,
            tax_cents: tax,
            shipping_cents: shipping,
            total_cents: subtotal + tax + shipping,
            currency: currency.clone(),
        },
        &lines
            .iter()
            .map(|l| queries::NewOrderItem {
                product_id: l.product_id.clone(),
                name: l.name.clone(),
                unit_amount_cents: l.amount,
                quantity: l.quantity,
                variation: l.variation.clone(),
            })
            .collect::<Vec<_>>(),
    )?;
    // The connection goes back to the pool while we wait on Stripe.
    drop(conn);

    let checkout_lines: Vec<CheckoutLine> = lines
        .iter()
        .map(|l| CheckoutLine {
            name: l.name.clone(),
            unit_amount_cents: l.amount,
            quantity: l.quantity,
        })
        .collect();

    let client = StripeClient::new(stripe);
    let (session_id, checkout_url) = client
        .create_cart_session(
            &order.id,
            &ctx.user.id,
            &ctx.user.email,
            &currency,
            &checkout_lines,
            tax,
            shipping,
            &state.success_page_url,
            &format!("{}/checkout/cancelled", state.base_url),
        )
        .await?;

    let conn = state.db.get()?;
    queries::set_order_stripe_session(&conn, &order.id, &session_id)?;

    tracing::info!(
        "cart checkout created: order={} session={} total={}{}",
        order.id,
        session_id,
        order.total_cents,
        currency
    );

    Ok(Json(CartCheckoutResponse {
        checkout_url,
        session_id,
        order_id: order.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionCheckoutRequest {
    pub plan: String,
    pub duration: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionCheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
}

pub async fn subscription_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<SubscriptionCheckoutRequest>,
) -> Result<Json<SubscriptionCheckoutResponse>> {
    let plan: Plan = request
        .plan
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_PLAN.into()))?;
    let duration: PlanDuration = request
        .duration
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_PLAN.into()))?;
    // The free plan has no price and never goes through Stripe.
    let price_cents = plan_price_cents(plan, duration)
        .ok_or_else(|| AppError::BadRequest(msg::INVALID_PLAN.into()))?;

    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::Config(msg::STRIPE_NOT_CONFIGURED.into()))?;

    let client = StripeClient::new(stripe);
    let (session_id, checkout_url) = client
        .create_subscription_session(
            &ctx.user.id,
            &ctx.user.email,
            plan,
            duration,
            price_cents,
            &state.success_page_url,
            &format!("{}/checkout/cancelled", state.base_url),
        )
        .await?;

    tracing::info!(
        "subscription checkout created: user={} plan={} duration={} session={}",
        ctx.user.id,
        plan,
        duration,
        session_id
    );

    Ok(Json(SubscriptionCheckoutResponse {
        checkout_url,
        session_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: Option<&str>, amount: Option<i64>, quantity: Option<i64>) -> CartItem {
        CartItem {
            product_id: None,
            name: name.map(String::from),
            amount,
            quantity,
            currency: None,
            image_url: None,
            variation: None,
        }
    }

    #[test]
    fn rejects_an_empty_cart() {
        assert!(validate_items(&[]).is_err());
    }

    #[test]
    fn rejects_incomplete_line_items() {
        assert!(validate_items(&[item(None, Some(500), Some(1))]).is_err());
        assert!(validate_items(&[item(Some("Shirt"), None, Some(1))]).is_err());
        assert!(validate_items(&[item(Some("Shirt"), Some(500), None)]).is_err());
        assert!(validate_items(&[item(Some("  "), Some(500), Some(1))]).is_err());
        assert!(validate_items(&[item(Some("Shirt"), Some(0), Some(1))]).is_err());
    }

    #[test]
    fn accepts_a_complete_cart() {
        let lines = validate_items(&[
            item(Some("Shirt"), Some(2_500), Some(2)),
            item(Some("Scarf"), Some(1_200), Some(1)),
        ])
        .unwrap();
        assert_eq!(lines.len(), 2);
        let subtotal: i64 = lines.iter().map(|l| l.amount * l.quantity).sum();
        assert_eq!(subtotal, 6_200);
    }
}
