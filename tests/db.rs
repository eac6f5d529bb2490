//! Query-level invariant tests against an in-memory database.

#[path = "common/mod.rs"]
mod common;

use common::*;

fn state() -> AppState {
    create_test_app_state()
}

#[test]
fn at_most_one_active_subscription_per_user() {
    let state = state();
    let user = create_test_user(&state, "fan@example.com", false);
    let conn = state.db.get().unwrap();
    let now = now();

    queries::create_subscription(&conn, &user.id, "basic", "1m", now, now + 86_400, Some("sub_1"))
        .unwrap();

    // The partial unique index rejects a second active row outright.
    let err = queries::create_subscription(
        &conn,
        &user.id,
        "pro",
        "1m",
        now,
        now + 86_400,
        Some("sub_2"),
    );
    assert!(err.is_err());

    // After deactivation a new active row is accepted.
    queries::deactivate_subscriptions_for_user(&conn, &user.id).unwrap();
    queries::create_subscription(&conn, &user.id, "pro", "1m", now, now + 86_400, Some("sub_2"))
        .unwrap();

    let subs = queries::list_subscriptions_for_user(&conn, &user.id).unwrap();
    assert_eq!(subs.iter().filter(|s| s.is_active).count(), 1);
}

#[test]
fn upsert_is_keyed_by_stripe_subscription_id() {
    let state = state();
    let user = create_test_user(&state, "fan@example.com", false);
    let conn = state.db.get().unwrap();
    let now = now();

    let first = queries::upsert_subscription_by_stripe_id(
        &conn,
        &UpsertSubscription {
            user_id: user.id.clone(),
            plan: "basic".to_string(),
            duration: "1m".to_string(),
            started_at: now,
            expires_at: now + 30 * 86_400,
            stripe_subscription_id: "sub_abc".to_string(),
        },
    )
    .unwrap();

    let second = queries::upsert_subscription_by_stripe_id(
        &conn,
        &UpsertSubscription {
            user_id: user.id.clone(),
            plan: "basic".to_string(),
            duration: "1m".to_string(),
            started_at: now + 100,
            expires_at: now + 31 * 86_400,
            stripe_subscription_id: "sub_abc".to_string(),
        },
    )
    .unwrap();

    assert_eq!(first.id, second.id, "conflict must land on the same row");
    assert_eq!(second.started_at, first.started_at, "started_at is preserved");
    assert_eq!(second.expires_at, now + 31 * 86_400);
    assert_eq!(
        queries::list_subscriptions_for_user(&conn, &user.id)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn extend_expiry_touches_nothing_else() {
    let state = state();
    let user = create_test_user(&state, "fan@example.com", false);
    let conn = state.db.get().unwrap();
    let now = now();

    let sub = queries::create_subscription(
        &conn,
        &user.id,
        "basic",
        "6m",
        now,
        now + 180 * 86_400,
        Some("sub_abc"),
    )
    .unwrap();

    let updated = queries::extend_subscription_expiry(&conn, "sub_abc", now + 360 * 86_400)
        .unwrap()
        .unwrap();
    assert_eq!(updated.expires_at, now + 360 * 86_400);
    assert_eq!(updated.started_at, sub.started_at);
    assert_eq!(updated.plan, "basic");

    // Inactive subscriptions are not extended.
    queries::deactivate_subscriptions_for_user(&conn, &user.id).unwrap();
    assert!(queries::extend_subscription_expiry(&conn, "sub_abc", now + 720 * 86_400)
        .unwrap()
        .is_none());
}

#[test]
fn webhook_event_dedup_accepts_each_id_once() {
    let state = state();
    let conn = state.db.get().unwrap();

    assert!(queries::try_record_webhook_event(&conn, "stripe", "evt_1").unwrap());
    assert!(!queries::try_record_webhook_event(&conn, "stripe", "evt_1").unwrap());
    // A different provider may reuse the id.
    assert!(queries::try_record_webhook_event(&conn, "other", "evt_1").unwrap());
}

#[test]
fn orders_complete_only_from_pending() {
    let state = state();
    let user = create_test_user(&state, "fan@example.com", false);
    let mut conn = state.db.get().unwrap();

    let order = queries::create_order_with_items(
        &mut conn,
        &user.id,
        &queries::OrderTotals {
            subtotal_cents: 1_000,
            tax_cents: 210,
            shipping_cents: 499,
            total_cents: 1_709,
            currency: "eur".to_string(),
        },
        &[queries::NewOrderItem {
            product_id: None,
            name: "Scarf".to_string(),
            unit_amount_cents: 1_000,
            quantity: 1,
            variation: None,
        }],
    )
    .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert!(queries::complete_order(&conn, &order.id, Some("pi_1")).unwrap());
    assert!(!queries::complete_order(&conn, &order.id, Some("pi_2")).unwrap());

    let stored = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Completed);
    assert_eq!(stored.stripe_payment_intent.as_deref(), Some("pi_1"));

    let items = queries::list_order_items(&conn, &order.id).unwrap();
    assert_eq!(items.len(), 1);
}

#[test]
fn soft_deleted_products_disappear_from_lookups() {
    let state = state();
    let product = create_test_product(&state, "Shirt", 5_999, 5);
    let conn = state.db.get().unwrap();

    assert!(queries::soft_delete_product(&conn, &product.id).unwrap());
    assert!(queries::get_product_by_id(&conn, &product.id)
        .unwrap()
        .is_none());
    assert!(queries::list_products(&conn).unwrap().is_empty());
    // Double delete reports nothing to do
    assert!(!queries::soft_delete_product(&conn, &product.id).unwrap());
}

#[test]
fn stock_decrement_clamps_at_zero() {
    let state = state();
    let product = create_test_product(&state, "Shirt", 5_999, 3);
    let conn = state.db.get().unwrap();

    queries::decrement_product_stock(&conn, &product.id, None, 5).unwrap();
    let stored = queries::get_product_by_id(&conn, &product.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.stock, 0);
}

#[test]
fn user_email_is_normalized_on_create_and_lookup() {
    let state = state();
    let conn = state.db.get().unwrap();

    let user = queries::create_user(
        &conn,
        &CreateUser {
            email: "  Fan@Example.COM ".to_string(),
            name: "Fan".to_string(),
            is_admin: false,
        },
    )
    .unwrap();
    assert_eq!(user.email, "fan@example.com");

    let found = queries::get_user_by_email(&conn, "FAN@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);
}
