use serde::{Deserialize, Serialize};

/// One billing period of marketplace access.
///
/// Rows are never hard-deleted: cancellation, expiry and downgrade flip
/// `is_active` off, so the table doubles as subscription history. A partial
/// unique index guarantees at most one active row per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub duration: String,
    pub is_active: bool,
    pub started_at: i64,
    pub expires_at: i64,
    /// Stripe subscription id (sub_xxx). None for free-plan rows.
    pub stripe_subscription_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Active and not yet past its expiry.
    pub fn is_live(&self, now: i64) -> bool {
        self.is_active && self.expires_at > now
    }
}

/// Input for the webhook-driven subscription upsert. Keyed by the Stripe
/// subscription id so re-delivered events land on the same row.
#[derive(Debug)]
pub struct UpsertSubscription {
    pub user_id: String,
    pub plan: String,
    pub duration: String,
    pub started_at: i64,
    pub expires_at: i64,
    pub stripe_subscription_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FreeSubscriptionRequest {
    pub plan: String,
    pub duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(is_active: bool, expires_at: i64) -> Subscription {
        Subscription {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            plan: "basic".to_string(),
            duration: "1m".to_string(),
            is_active,
            started_at: 0,
            expires_at,
            stripe_subscription_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn liveness_needs_both_the_flag_and_a_future_expiry() {
        assert!(sub(true, 100).is_live(99));
        assert!(!sub(true, 100).is_live(100));
        assert!(!sub(false, 100).is_live(99));
    }
}
