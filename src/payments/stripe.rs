use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{msg, AppError, Result};
use crate::models::{Plan, PlanDuration};

use super::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

// Note: cart checkouts use ad-hoc price_data because the catalog lives in
// our own database; only the shape of the session is Stripe's.

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

/// One line of a cart checkout, already validated and priced.
#[derive(Debug)]
pub struct CheckoutLine {
    pub name: String,
    pub unit_amount_cents: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    /// Create a one-time payment session for a shop order. Tax and shipping
    /// ride along as their own line items so the Stripe total matches ours.
    /// Returns (session_id, redirect_url).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_cart_session(
        &self,
        order_id: &str,
        user_id: &str,
        user_email: &str,
        currency: &str,
        lines: &[CheckoutLine],
        tax_cents: i64,
        shipping_cents: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), success_url.into()),
            ("cancel_url".into(), cancel_url.into()),
            ("metadata[order_id]".into(), order_id.into()),
            ("metadata[user_id]".into(), user_id.into()),
            ("metadata[user_email]".into(), user_email.into()),
            (
                "metadata[created_at]".into(),
                chrono::Utc::now().timestamp().to_string(),
            ),
        ];

        let mut idx = 0;
        for line in lines {
            push_line_item(
                &mut form,
                idx,
                currency,
                &line.name,
                line.unit_amount_cents,
                line.quantity,
            );
            idx += 1;
        }
        if tax_cents > 0 {
            push_line_item(&mut form, idx, currency, "Tax", tax_cents, 1);
            idx += 1;
        }
        if shipping_cents > 0 {
            push_line_item(&mut form, idx, currency, "Shipping", shipping_cents, 1);
        }

        self.post_checkout_session(&form).await
    }

    /// Create a recurring subscription session for a plan/duration pair.
    /// Returns (session_id, redirect_url).
    pub async fn create_subscription_session(
        &self,
        user_id: &str,
        user_email: &str,
        plan: Plan,
        duration: PlanDuration,
        price_cents: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<(String, String)> {
        let form: Vec<(String, String)> = vec![
            ("mode".into(), "subscription".into()),
            ("success_url".into(), success_url.into()),
            ("cancel_url".into(), cancel_url.into()),
            ("customer_email".into(), user_email.into()),
            ("line_items[0][price_data][currency]".into(), "eur".into()),
            (
                "line_items[0][price_data][product_data][name]".into(),
                format!("Pitchside {} ({})", plan, duration),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                price_cents.to_string(),
            ),
            (
                "line_items[0][price_data][recurring][interval]".into(),
                "month".into(),
            ),
            (
                "line_items[0][price_data][recurring][interval_count]".into(),
                duration.interval_months().to_string(),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
            ("metadata[user_id]".into(), user_id.into()),
            ("metadata[plan]".into(), plan.as_str().into()),
            ("metadata[duration]".into(), duration.as_str().into()),
            // Session metadata is not copied to the subscription object, so
            // mirror it there for later events.
            ("subscription_data[metadata][user_id]".into(), user_id.into()),
            ("subscription_data[metadata][plan]".into(), plan.as_str().into()),
            (
                "subscription_data[metadata][duration]".into(),
                duration.as_str().into(),
            ),
        ];

        self.post_checkout_session(&form).await
    }

    async fn post_checkout_session(&self, form: &[(String, String)]) -> Result<(String, String)> {
        let response = self
            .client
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Stripe API error: {}", error_text)));
        }

        let session: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Stripe response: {}", e)))?;

        Ok((session.id, session.url))
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        verify_signature_with_secret(&self.webhook_secret, payload, signature)
    }
}

fn push_line_item(
    form: &mut Vec<(String, String)>,
    idx: usize,
    currency: &str,
    name: &str,
    unit_amount_cents: i64,
    quantity: i64,
) {
    form.push((
        format!("line_items[{}][price_data][currency]", idx),
        currency.into(),
    ));
    form.push((
        format!("line_items[{}][price_data][product_data][name]", idx),
        name.into(),
    ));
    form.push((
        format!("line_items[{}][price_data][unit_amount]", idx),
        unit_amount_cents.to_string(),
    ));
    form.push((format!("line_items[{}][quantity]", idx), quantity.to_string()));
}

/// Verify a Stripe webhook signature header against the raw payload.
/// Signature format: t=timestamp,v1=hex_hmac.
pub fn verify_signature_with_secret(
    webhook_secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<bool> {
    let parts: Vec<&str> = signature.split(',').collect();

    let mut timestamp = None;
    let mut sig_v1 = None;

    for part in parts {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    let sig_v1 =
        sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

    // Reject stale timestamps to limit the replay window.
    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

    let now = chrono::Utc::now().timestamp();
    let age = now - timestamp;

    if age > StripeClient::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            StripeClient::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
        );
        return Ok(false);
    }

    // Clock skew tolerance for timestamps from the future: 60 seconds
    if age < -60 {
        tracing::warn!(
            "Stripe webhook rejected: timestamp in the future (age={}s)",
            age
        );
        return Ok(false);
    }

    let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();

    // Length check is not constant-time, but signature length is not secret
    // (always 64 hex chars for SHA-256)
    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    // Constant-time comparison to prevent timing attacks
    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>, // "payment" or "subscription"
    pub payment_status: String,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub subscription: Option<String>, // Present for subscription mode
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub order_id: Option<String>,
    pub user_id: Option<String>,
    pub plan: Option<String>,
    pub duration: Option<String>,
}

// ============ invoice.paid ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub billing_reason: Option<String>, // "subscription_create", "subscription_cycle", etc.
    pub status: String,                 // "paid", "open", etc.
    /// End of the billing period the invoice covers, when Stripe sends it.
    pub period_end: Option<i64>,
}

// ============ customer.subscription.deleted ============

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: String, // "active", "canceled", etc.
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, String::from_utf8_lossy(payload)).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_freshly_signed_payload() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign("whsec_test", chrono::Utc::now().timestamp(), payload);
        assert!(verify_signature_with_secret("whsec_test", payload, &header).unwrap());
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign("whsec_test", chrono::Utc::now().timestamp(), payload);
        let tampered = br#"{"id":"evt_2"}"#;
        assert!(!verify_signature_with_secret("whsec_test", tampered, &header).unwrap());
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign("whsec_test", chrono::Utc::now().timestamp() - 301, payload);
        assert!(!verify_signature_with_secret("whsec_test", payload, &header).unwrap());
    }

    #[test]
    fn rejects_a_malformed_header() {
        let err = verify_signature_with_secret("whsec_test", b"{}", "v1=deadbeef");
        assert!(err.is_err());
    }
}
