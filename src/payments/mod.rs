mod stripe;

pub use stripe::*;

/// Stripe credentials, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}
