//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt data.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str =
    "id, email, name, session_token, subscribed, is_admin, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, plan, duration, is_active, started_at, expires_at, stripe_subscription_id, created_at, updated_at";

pub const ORDER_COLS: &str = "id, user_id, status, subtotal_cents, tax_cents, shipping_cents, total_cents, currency, stripe_session_id, stripe_payment_intent, created_at, updated_at";

pub const ORDER_ITEM_COLS: &str =
    "id, order_id, product_id, name, unit_amount_cents, quantity, variation";

pub const PRODUCT_COLS: &str =
    "id, name, description, price_cents, currency, stock, image_url, created_at, updated_at, deleted_at";

pub const VARIATION_COLS: &str = "id, product_id, attribute, stock";

pub const UNMATCHED_EVENT_COLS: &str = "id, provider, event_type, reason, payload, created_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            session_token: row.get(3)?,
            subscribed: row.get(4)?,
            is_admin: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan: row.get(2)?,
            duration: row.get(3)?,
            is_active: row.get(4)?,
            started_at: row.get(5)?,
            expires_at: row.get(6)?,
            stripe_subscription_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: parse_enum(row, 2, "status")?,
            subtotal_cents: row.get(3)?,
            tax_cents: row.get(4)?,
            shipping_cents: row.get(5)?,
            total_cents: row.get(6)?,
            currency: row.get(7)?,
            stripe_session_id: row.get(8)?,
            stripe_payment_intent: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            name: row.get(3)?,
            unit_amount_cents: row.get(4)?,
            quantity: row.get(5)?,
            variation: row.get(6)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            stock: row.get(5)?,
            image_url: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            deleted_at: row.get(9)?,
        })
    }
}

impl FromRow for ProductVariation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProductVariation {
            id: row.get(0)?,
            product_id: row.get(1)?,
            attribute: row.get(2)?,
            stock: row.get(3)?,
        })
    }
}

impl FromRow for crate::db::queries::UnmatchedEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(crate::db::queries::UnmatchedEvent {
            id: row.get(0)?,
            provider: row.get(1)?,
            event_type: row.get(2)?,
            reason: row.get(3)?,
            payload: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
