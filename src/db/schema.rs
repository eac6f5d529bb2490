use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Users (commerce-relevant state; identity lives with the auth provider)
        -- subscribed is a derived cache of subscription state, only written in
        -- the same transaction as the subscription rows that justify it.
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            session_token TEXT NOT NULL UNIQUE,
            subscribed INTEGER NOT NULL DEFAULT 0,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
        CREATE INDEX IF NOT EXISTS idx_users_token ON users(session_token);

        -- Subscriptions (one row per billing period; never hard-deleted)
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            plan TEXT NOT NULL,
            duration TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            stripe_subscription_id TEXT UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
        -- At most one active subscription per user, enforced by the schema
        -- rather than by application code alone.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active
            ON subscriptions(user_id) WHERE is_active = 1;

        -- Orders (shop purchases; pending until the webhook completes them)
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'completed', 'cancelled')),
            subtotal_cents INTEGER NOT NULL,
            tax_cents INTEGER NOT NULL,
            shipping_cents INTEGER NOT NULL,
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            stripe_session_id TEXT UNIQUE,
            stripe_payment_intent TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);
        CREATE INDEX IF NOT EXISTS idx_orders_session ON orders(stripe_session_id);

        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id TEXT REFERENCES products(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            unit_amount_cents INTEGER NOT NULL,
            quantity INTEGER NOT NULL,
            variation TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

        -- Products (shop catalog; soft-deleted so old orders keep their link)
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            stock INTEGER NOT NULL DEFAULT 0,
            image_url TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_products_active ON products(id) WHERE deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS product_variations (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            attribute TEXT NOT NULL,
            stock INTEGER NOT NULL DEFAULT 0,
            UNIQUE(product_id, attribute)
        );
        CREATE INDEX IF NOT EXISTS idx_variations_product ON product_variations(product_id);

        -- Processed webhook events (replay/duplicate protection)
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_lookup ON webhook_events(provider, event_id);

        -- Webhook events we could not apply (unknown user, unmatched session).
        -- Acknowledged 200 to the provider, surfaced via the admin
        -- reconciliation report instead of silently discarded.
        CREATE TABLE IF NOT EXISTS unmatched_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            event_type TEXT NOT NULL,
            reason TEXT NOT NULL,
            payload TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_unmatched_events_time ON unmatched_events(created_at DESC);
        "#,
    )?;
    Ok(())
}
