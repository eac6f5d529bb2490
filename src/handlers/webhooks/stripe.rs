use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::db::AppState;
use crate::error::Result;
use crate::payments::{
    StripeCheckoutSession, StripeClient, StripeInvoice, StripeSubscription, StripeWebhookEvent,
};

use super::common::{
    apply_event, CancellationData, OrderPaidData, RenewalData, SubscriptionStartData, WebhookEvent,
    WebhookResult,
};

/// Stripe webhook endpoint. Signature verification happens against the raw
/// body before any JSON parsing; an invalid signature means zero writes.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResult> {
    let Some(stripe) = state.stripe.as_ref() else {
        // 200 rather than 5xx so Stripe does not retry forever against a
        // deliberately unconfigured instance.
        tracing::warn!("Stripe webhook received but Stripe is not configured");
        return Ok((StatusCode::OK, "Stripe not configured"));
    };

    let Some(signature) = headers.get("stripe-signature") else {
        return Ok((StatusCode::BAD_REQUEST, "Missing stripe-signature header"));
    };
    let Ok(signature) = signature.to_str() else {
        return Ok((StatusCode::BAD_REQUEST, "Invalid signature header"));
    };

    let client = StripeClient::new(stripe);
    if !client.verify_webhook_signature(&body, signature)? {
        tracing::warn!("Stripe webhook rejected: signature mismatch");
        return Ok((StatusCode::BAD_REQUEST, "Invalid signature"));
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!("Failed to parse Stripe webhook: {}", err);
            return Ok((StatusCode::BAD_REQUEST, "Invalid JSON"));
        }
    };

    let parsed = match parse_event(&event) {
        Ok(parsed) => parsed,
        Err(result) => return Ok(result),
    };

    let mut conn = state.db.get()?;
    let payload = String::from_utf8_lossy(&body);
    apply_event(
        &mut conn,
        "stripe",
        &event.id,
        &event.event_type,
        &payload,
        parsed,
    )
}

fn parse_event(event: &StripeWebhookEvent) -> std::result::Result<WebhookEvent, WebhookResult> {
    match event.event_type.as_str() {
        "checkout.session.completed" => parse_checkout_completed(event),
        "invoice.paid" => parse_invoice_paid(event),
        "customer.subscription.deleted" => parse_subscription_deleted(event),
        _ => Ok(WebhookEvent::Ignored),
    }
}

fn parse_checkout_completed(
    event: &StripeWebhookEvent,
) -> std::result::Result<WebhookEvent, WebhookResult> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    if session.payment_status != "paid" {
        return Ok(WebhookEvent::Ignored);
    }

    // A subscription-mode session carries the subscription id; everything
    // else is a one-time cart payment against a pending order.
    if let Some(subscription_id) = session.subscription {
        return Ok(WebhookEvent::SubscriptionStarted(SubscriptionStartData {
            stripe_subscription_id: subscription_id,
            user_id: session.metadata.user_id,
            customer_email: session.customer_email,
            plan: session.metadata.plan,
            duration: session.metadata.duration,
        }));
    }

    Ok(WebhookEvent::OrderPaid(OrderPaidData {
        session_id: session.id,
        order_id: session.metadata.order_id,
        payment_intent: session.payment_intent,
    }))
}

fn parse_invoice_paid(
    event: &StripeWebhookEvent,
) -> std::result::Result<WebhookEvent, WebhookResult> {
    let invoice: StripeInvoice =
        serde_json::from_value(event.data.object.clone()).map_err(|e| {
            tracing::error!("Failed to parse invoice: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid invoice")
        })?;

    let Some(subscription_id) = invoice.subscription else {
        return Ok(WebhookEvent::Ignored);
    };

    // The initial invoice (subscription_create) is covered by the
    // checkout.session.completed event; only renewals extend expiry here.
    if invoice.billing_reason.as_deref() != Some("subscription_cycle") {
        return Ok(WebhookEvent::Ignored);
    }
    if invoice.status != "paid" {
        return Ok(WebhookEvent::Ignored);
    }

    Ok(WebhookEvent::SubscriptionRenewed(RenewalData {
        stripe_subscription_id: subscription_id,
        period_end: invoice.period_end,
    }))
}

fn parse_subscription_deleted(
    event: &StripeWebhookEvent,
) -> std::result::Result<WebhookEvent, WebhookResult> {
    let subscription: StripeSubscription = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse subscription: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid subscription")
        })?;

    Ok(WebhookEvent::SubscriptionCancelled(CancellationData {
        stripe_subscription_id: subscription.id,
    }))
}
