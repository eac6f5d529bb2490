use serde::{Deserialize, Serialize};

/// Marketplace user. Identity itself (password, OAuth) lives with the hosted
/// auth provider; this record carries the commerce-relevant state.
///
/// `subscribed` is a derived cache of subscription state: it is only ever
/// written in the same SQL transaction as the subscription mutation that
/// justifies it, so it always agrees with the subscriptions table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Bearer token the frontend presents on authenticated API calls.
    #[serde(skip_serializing)]
    pub session_token: String,
    pub subscribed: bool,
    pub is_admin: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
}
