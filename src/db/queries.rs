use chrono::Utc;
use rusqlite::{params, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, FromRow, ORDER_COLS, ORDER_ITEM_COLS, PRODUCT_COLS, SUBSCRIPTION_COLS,
    UNMATCHED_EVENT_COLS, USER_COLS, VARIATION_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a session token for a new user. Opaque, URL-safe.
pub fn generate_session_token() -> String {
    format!("ps_{}", Uuid::new_v4().simple())
}

/// Builder for dynamic UPDATE statements with optional fields.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
        }
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Execute the update and return the updated entity via RETURNING.
    /// Returns None if no rows matched or there was nothing to update.
    fn execute_returning<T: FromRow>(
        mut self,
        conn: &Connection,
        returning_cols: &str,
    ) -> Result<Option<T>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        self.fields.push(("updated_at", now().into()));
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? AND deleted_at IS NULL RETURNING {}",
            self.table,
            sets.join(", "),
            returning_cols
        );
        conn.query_row(&sql, rusqlite::params_from_iter(values), T::from_row)
            .optional()
            .map_err(Into::into)
    }
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();
    let email = input.email.trim().to_lowercase();
    let session_token = generate_session_token();

    conn.execute(
        "INSERT INTO users (id, email, name, session_token, subscribed, is_admin, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
        params![&id, &email, &input.name, &session_token, input.is_admin, now, now],
    )?;

    Ok(User {
        id,
        email,
        name: input.name.clone(),
        session_token,
        subscribed: false,
        is_admin: input.is_admin,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let email = email.trim().to_lowercase();
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLS),
        &[&email],
    )
}

pub fn get_user_by_session_token(conn: &Connection, token: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE session_token = ?1", USER_COLS),
        &[&token],
    )
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    query_all(
        conn,
        &format!("SELECT {} FROM users ORDER BY created_at DESC", USER_COLS),
        &[],
    )
}

/// Flip the derived `subscribed` flag. Callers must run this inside the same
/// transaction as the subscription mutation that justifies the new value.
pub fn set_user_subscribed(conn: &Connection, user_id: &str, subscribed: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE users SET subscribed = ?1, updated_at = ?2 WHERE id = ?3",
        params![subscribed, now(), user_id],
    )?;
    Ok(affected > 0)
}

// ============ Subscriptions ============

/// Most recent active, non-expired subscription for a user.
pub fn find_active_subscription(
    conn: &Connection,
    user_id: &str,
    now: i64,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions
             WHERE user_id = ?1 AND is_active = 1 AND expires_at > ?2
             ORDER BY started_at DESC LIMIT 1",
            SUBSCRIPTION_COLS
        ),
        &[&user_id, &now],
    )
}

pub fn list_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 ORDER BY started_at DESC",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

pub fn get_subscription_by_stripe_id(
    conn: &Connection,
    stripe_subscription_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE stripe_subscription_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&stripe_subscription_id],
    )
}

/// Deactivate every active subscription a user holds. Returns how many rows
/// were flipped.
pub fn deactivate_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE subscriptions SET is_active = 0, updated_at = ?1
         WHERE user_id = ?2 AND is_active = 1",
        params![now(), user_id],
    )?;
    Ok(affected)
}

/// Create a subscription row. `stripe_subscription_id` is None for free-plan
/// activations.
pub fn create_subscription(
    conn: &Connection,
    user_id: &str,
    plan: &str,
    duration: &str,
    started_at: i64,
    expires_at: i64,
    stripe_subscription_id: Option<&str>,
) -> Result<Subscription> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO subscriptions
            (id, user_id, plan, duration, is_active, started_at, expires_at,
             stripe_subscription_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9)",
        params![
            &id,
            user_id,
            plan,
            duration,
            started_at,
            expires_at,
            stripe_subscription_id,
            now,
            now
        ],
    )?;

    Ok(Subscription {
        id,
        user_id: user_id.to_string(),
        plan: plan.to_string(),
        duration: duration.to_string(),
        is_active: true,
        started_at,
        expires_at,
        stripe_subscription_id: stripe_subscription_id.map(String::from),
        created_at: now,
        updated_at: now,
    })
}

/// Idempotent webhook-side create: keyed on the Stripe subscription id, so a
/// re-delivered `checkout.session.completed` lands on the existing row
/// instead of creating a duplicate. `started_at` is preserved on conflict.
pub fn upsert_subscription_by_stripe_id(
    conn: &Connection,
    input: &UpsertSubscription,
) -> Result<Subscription> {
    let id = gen_id();
    let now = now();

    conn.query_row(
        &format!(
            "INSERT INTO subscriptions
                (id, user_id, plan, duration, is_active, started_at, expires_at,
                 stripe_subscription_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(stripe_subscription_id) DO UPDATE SET
                is_active = 1,
                plan = excluded.plan,
                duration = excluded.duration,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![
            &id,
            &input.user_id,
            &input.plan,
            &input.duration,
            input.started_at,
            input.expires_at,
            &input.stripe_subscription_id,
            now
        ],
        Subscription::from_row,
    )
    .map_err(Into::into)
}

/// Extend the expiry of the active subscription matching a Stripe id
/// (renewal via `invoice.paid`). `started_at` and `plan` are untouched.
/// Returns the updated row, or None when no active match exists.
pub fn extend_subscription_expiry(
    conn: &Connection,
    stripe_subscription_id: &str,
    new_expires_at: i64,
) -> Result<Option<Subscription>> {
    conn.query_row(
        &format!(
            "UPDATE subscriptions SET expires_at = ?1, updated_at = ?2
             WHERE stripe_subscription_id = ?3 AND is_active = 1
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![new_expires_at, now(), stripe_subscription_id],
        Subscription::from_row,
    )
    .optional()
    .map_err(Into::into)
}

// ============ Orders ============

#[derive(Debug)]
pub struct OrderTotals {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub currency: String,
}

#[derive(Debug)]
pub struct NewOrderItem {
    pub product_id: Option<String>,
    pub name: String,
    pub unit_amount_cents: i64,
    pub quantity: i64,
    pub variation: Option<String>,
}

/// Create a pending order together with its line items, atomically.
pub fn create_order_with_items(
    conn: &mut Connection,
    user_id: &str,
    totals: &OrderTotals,
    items: &[NewOrderItem],
) -> Result<Order> {
    let id = gen_id();
    let now = now();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO orders
            (id, user_id, status, subtotal_cents, tax_cents, shipping_cents,
             total_cents, currency, created_at, updated_at)
         VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            &id,
            user_id,
            totals.subtotal_cents,
            totals.tax_cents,
            totals.shipping_cents,
            totals.total_cents,
            &totals.currency,
            now
        ],
    )?;
    for item in items {
        tx.execute(
            "INSERT INTO order_items
                (id, order_id, product_id, name, unit_amount_cents, quantity, variation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                gen_id(),
                &id,
                &item.product_id,
                &item.name,
                item.unit_amount_cents,
                item.quantity,
                &item.variation
            ],
        )?;
    }
    tx.commit()?;

    Ok(Order {
        id,
        user_id: user_id.to_string(),
        status: OrderStatus::Pending,
        subtotal_cents: totals.subtotal_cents,
        tax_cents: totals.tax_cents,
        shipping_cents: totals.shipping_cents,
        total_cents: totals.total_cents,
        currency: totals.currency.clone(),
        stripe_session_id: None,
        stripe_payment_intent: None,
        created_at: now,
        updated_at: now,
    })
}

/// Link the order to the Stripe checkout session once the session exists.
pub fn set_order_stripe_session(conn: &Connection, order_id: &str, session_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET stripe_session_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![session_id, now(), order_id],
    )?;
    Ok(affected > 0)
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_for_user(conn: &Connection, id: &str, user_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE id = ?1 AND user_id = ?2",
            ORDER_COLS
        ),
        &[&id, &user_id],
    )
}

pub fn get_order_by_stripe_session(conn: &Connection, session_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE stripe_session_id = ?1",
            ORDER_COLS
        ),
        &[&session_id],
    )
}

pub fn list_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

/// Move a pending order to completed. Returns false when the order was not
/// pending (already completed by an earlier delivery, or cancelled).
pub fn complete_order(
    conn: &Connection,
    order_id: &str,
    payment_intent: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = 'completed', stripe_payment_intent = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![payment_intent, now(), order_id],
    )?;
    Ok(affected > 0)
}

// ============ Products ============

pub fn create_product(conn: &mut Connection, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO products
            (id, name, description, price_cents, currency, stock, image_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            &id,
            &input.name,
            &input.description,
            input.price_cents,
            &input.currency,
            input.stock,
            &input.image_url,
            now
        ],
    )?;
    for variation in &input.variations {
        tx.execute(
            "INSERT INTO product_variations (id, product_id, attribute, stock)
             VALUES (?1, ?2, ?3, ?4)",
            params![gen_id(), &id, &variation.attribute, variation.stock],
        )?;
    }
    tx.commit()?;

    Ok(Product {
        id,
        name: input.name.clone(),
        description: input.description.clone(),
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        stock: input.stock,
        image_url: input.image_url.clone(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM products WHERE id = ?1 AND deleted_at IS NULL",
            PRODUCT_COLS
        ),
        &[&id],
    )
}

pub fn list_products(conn: &Connection) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM products WHERE deleted_at IS NULL ORDER BY created_at DESC",
            PRODUCT_COLS
        ),
        &[],
    )
}

pub fn update_product(
    conn: &Connection,
    id: &str,
    input: &UpdateProduct,
) -> Result<Option<Product>> {
    UpdateBuilder::new("products", id)
        .set_opt("name", input.name.clone())
        .set_opt("description", input.description.clone())
        .set_opt("price_cents", input.price_cents)
        .set_opt("currency", input.currency.clone())
        .set_opt("stock", input.stock)
        .set_opt("image_url", input.image_url.clone())
        .execute_returning(conn, PRODUCT_COLS)
}

pub fn soft_delete_product(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE products SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

pub fn list_product_variations(conn: &Connection, product_id: &str) -> Result<Vec<ProductVariation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM product_variations WHERE product_id = ?1 ORDER BY attribute",
            VARIATION_COLS
        ),
        &[&product_id],
    )
}

/// Decrement stock for a fulfilled order line. When `variation` is given the
/// attribute sub-stock is decremented as well. Stock never goes below zero;
/// oversell is clamped rather than rejected since the payment has already
/// settled by the time the webhook arrives.
pub fn decrement_product_stock(
    conn: &Connection,
    product_id: &str,
    variation: Option<&str>,
    quantity: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE products SET stock = MAX(0, stock - ?1), updated_at = ?2 WHERE id = ?3",
        params![quantity, now(), product_id],
    )?;
    if let Some(attribute) = variation {
        conn.execute(
            "UPDATE product_variations SET stock = MAX(0, stock - ?1)
             WHERE product_id = ?2 AND attribute = ?3",
            params![quantity, product_id, attribute],
        )?;
    }
    Ok(())
}

// ============ Webhook events ============

/// Record a webhook event id for replay protection. Returns true when the
/// event is new, false when it was already processed.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![gen_id(), provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// A webhook event that was acknowledged but could not be applied.
#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedEvent {
    pub id: String,
    pub provider: String,
    pub event_type: String,
    pub reason: String,
    pub payload: Option<String>,
    pub created_at: i64,
}

pub fn record_unmatched_event(
    conn: &Connection,
    provider: &str,
    event_type: &str,
    reason: &str,
    payload: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO unmatched_events (id, provider, event_type, reason, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![gen_id(), provider, event_type, reason, payload, now()],
    )?;
    Ok(())
}

pub fn list_unmatched_events(conn: &Connection, limit: i64) -> Result<Vec<UnmatchedEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM unmatched_events ORDER BY created_at DESC LIMIT ?1",
            UNMATCHED_EVENT_COLS
        ),
        &[&limit],
    )
}
