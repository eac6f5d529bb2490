//! Provider-independent webhook application logic.
//!
//! Every event is applied inside a single SQL transaction that also records
//! the event id for replay protection: either the whole effect lands, or
//! none of it does and the provider's retry gets a clean slate.

use axum::http::StatusCode;
use chrono::Utc;
use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{PlanDuration, UpsertSubscription};

const SECONDS_PER_DAY: i64 = 86_400;

/// Status and acknowledgement text returned to the provider.
pub type WebhookResult = (StatusCode, &'static str);

/// Parsed webhook event, normalized away from provider payload shapes.
pub enum WebhookEvent {
    SubscriptionStarted(SubscriptionStartData),
    OrderPaid(OrderPaidData),
    SubscriptionRenewed(RenewalData),
    SubscriptionCancelled(CancellationData),
    Ignored,
}

pub struct SubscriptionStartData {
    pub stripe_subscription_id: String,
    pub user_id: Option<String>,
    pub customer_email: Option<String>,
    pub plan: Option<String>,
    pub duration: Option<String>,
}

pub struct OrderPaidData {
    pub session_id: String,
    pub order_id: Option<String>,
    pub payment_intent: Option<String>,
}

pub struct RenewalData {
    pub stripe_subscription_id: String,
    pub period_end: Option<i64>,
}

pub struct CancellationData {
    pub stripe_subscription_id: String,
}

/// Record an event we acknowledge but cannot apply. The row feeds the admin
/// reconciliation report; the 200 stops the provider's retries.
fn record_unmatched(
    tx: &Connection,
    provider: &str,
    event_id: &str,
    event_type: &str,
    reason: &'static str,
    payload: &str,
) -> Result<WebhookResult> {
    tracing::warn!(
        "{} event {} ({}) unmatched: {}",
        provider,
        event_id,
        event_type,
        reason
    );
    queries::record_unmatched_event(tx, provider, event_type, reason, Some(payload))?;
    Ok((StatusCode::OK, reason))
}

/// Apply a verified, parsed event inside one transaction.
pub fn apply_event(
    conn: &mut Connection,
    provider: &str,
    event_id: &str,
    event_type: &str,
    payload: &str,
    event: WebhookEvent,
) -> Result<WebhookResult> {
    let tx = conn.transaction()?;

    if !queries::try_record_webhook_event(&tx, provider, event_id)? {
        tracing::info!("{} event {} already processed, skipping", provider, event_id);
        return Ok((StatusCode::OK, "Event already processed"));
    }

    macro_rules! unmatched {
        ($reason:expr) => {{
            let result = record_unmatched(&tx, provider, event_id, event_type, $reason, payload)?;
            tx.commit()?;
            return Ok(result);
        }};
    }

    let outcome = match event {
        WebhookEvent::SubscriptionStarted(data) => {
            let user = match &data.user_id {
                Some(id) => queries::get_user_by_id(&tx, id)?,
                None => None,
            };
            let user = match (user, &data.customer_email) {
                (Some(user), _) => Some(user),
                (None, Some(email)) => queries::get_user_by_email(&tx, email)?,
                (None, None) => None,
            };
            let Some(user) = user else {
                unmatched!("No matching user for subscription");
            };

            let Some(duration) = data
                .duration
                .as_deref()
                .and_then(|d| d.parse::<PlanDuration>().ok())
            else {
                unmatched!("Missing or invalid duration metadata");
            };
            let Some(plan) = data.plan else {
                unmatched!("Missing plan metadata");
            };

            let now = Utc::now().timestamp();
            // A replaced plan goes inactive before the new row lands, keeping
            // the one-active-per-user index satisfied.
            queries::deactivate_subscriptions_for_user(&tx, &user.id)?;
            queries::upsert_subscription_by_stripe_id(
                &tx,
                &UpsertSubscription {
                    user_id: user.id.clone(),
                    plan,
                    duration: duration.as_str().to_string(),
                    started_at: now,
                    expires_at: now + duration.days() * SECONDS_PER_DAY,
                    stripe_subscription_id: data.stripe_subscription_id,
                },
            )?;
            queries::set_user_subscribed(&tx, &user.id, true)?;

            tracing::info!("subscription started: user={}", user.id);
            (StatusCode::OK, "Subscription recorded")
        }

        WebhookEvent::OrderPaid(data) => {
            let order = match &data.order_id {
                Some(id) => queries::get_order_by_id(&tx, id)?,
                None => None,
            };
            let order = match order {
                Some(order) => Some(order),
                None => queries::get_order_by_stripe_session(&tx, &data.session_id)?,
            };
            let Some(order) = order else {
                unmatched!("No matching order for checkout session");
            };

            if queries::complete_order(&tx, &order.id, data.payment_intent.as_deref())? {
                for item in queries::list_order_items(&tx, &order.id)? {
                    if let Some(product_id) = &item.product_id {
                        queries::decrement_product_stock(
                            &tx,
                            product_id,
                            item.variation.as_deref(),
                            item.quantity,
                        )?;
                    }
                }
                tracing::info!("order completed: id={} user={}", order.id, order.user_id);
                (StatusCode::OK, "Order completed")
            } else {
                // Already completed or cancelled; stock was handled then.
                (StatusCode::OK, "Order already settled")
            }
        }

        WebhookEvent::SubscriptionRenewed(data) => {
            let Some(sub) =
                queries::get_subscription_by_stripe_id(&tx, &data.stripe_subscription_id)?
            else {
                unmatched!("No matching subscription for invoice");
            };

            // Prefer the provider's billing period end; fall back to pushing
            // our own expiry out by one duration.
            let new_expires_at = data.period_end.unwrap_or_else(|| {
                let days = sub
                    .duration
                    .parse::<PlanDuration>()
                    .map(|d| d.days())
                    .unwrap_or(30);
                sub.expires_at + days * SECONDS_PER_DAY
            });

            match queries::extend_subscription_expiry(
                &tx,
                &data.stripe_subscription_id,
                new_expires_at,
            )? {
                Some(updated) => {
                    tracing::info!(
                        "subscription renewed: user={} expires_at={}",
                        updated.user_id,
                        updated.expires_at
                    );
                    (StatusCode::OK, "Subscription renewed")
                }
                None => {
                    unmatched!("Subscription is not active");
                }
            }
        }

        WebhookEvent::SubscriptionCancelled(data) => {
            let Some(sub) =
                queries::get_subscription_by_stripe_id(&tx, &data.stripe_subscription_id)?
            else {
                unmatched!("No matching subscription to cancel");
            };

            queries::deactivate_subscriptions_for_user(&tx, &sub.user_id)?;
            queries::set_user_subscribed(&tx, &sub.user_id, false)?;

            tracing::info!("subscription cancelled: user={}", sub.user_id);
            (StatusCode::OK, "Subscription cancelled")
        }

        WebhookEvent::Ignored => (StatusCode::OK, "Event ignored"),
    };

    tx.commit()?;
    Ok(outcome)
}
