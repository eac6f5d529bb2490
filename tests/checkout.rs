//! Checkout endpoint validation tests. Paths that would reach Stripe are
//! exercised only up to the remote call boundary.

#[path = "common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::json;
use tower::ServiceExt;

fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn cart_checkout_requires_authentication() {
    let state = create_test_app_state();

    let response = test_app(state)
        .oneshot(post_json(
            "/api/checkout/cart",
            None,
            json!({ "items": [] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);

    let response = test_app(state)
        .oneshot(post_json(
            "/api/checkout/cart",
            Some(&user.session_token),
            json!({ "items": [] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn line_item_missing_fields_is_rejected() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);

    let carts = [
        json!({ "items": [{ "amount": 500, "quantity": 1 }] }),
        json!({ "items": [{ "name": "Shirt", "quantity": 1 }] }),
        json!({ "items": [{ "name": "Shirt", "amount": 500 }] }),
        json!({ "items": [{ "name": "Shirt", "amount": 0, "quantity": 1 }] }),
        json!({ "items": [
            { "name": "Shirt", "amount": 500, "quantity": 1 },
            { "name": "Scarf", "quantity": 2 }
        ] }),
    ];

    for cart in carts {
        let response = test_app(state.clone())
            .oneshot(post_json(
                "/api/checkout/cart",
                Some(&user.session_token),
                cart,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // Validation failures never leave a pending order behind
    let conn = state.db.get().unwrap();
    assert!(queries::get_order_for_user(&conn, "any", &user.id)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn cart_checkout_without_stripe_config_is_a_config_error() {
    let mut state = create_test_app_state();
    state.stripe = None;
    let user = create_test_user(&state, "fan@example.com", false);

    let response = test_app(state.clone())
        .oneshot(post_json(
            "/api/checkout/cart",
            Some(&user.session_token),
            json!({ "items": [{ "name": "Shirt", "amount": 500, "quantity": 1 }] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Configuration error");
}

#[tokio::test]
async fn subscription_checkout_rejects_unknown_plans() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);

    let bodies = [
        json!({ "plan": "platinum", "duration": "1m" }),
        json!({ "plan": "basic", "duration": "2w" }),
        // The free plan is activated directly, never bought
        json!({ "plan": "free", "duration": "1m" }),
    ];

    for body in bodies {
        let response = test_app(state.clone())
            .oneshot(post_json(
                "/api/checkout/subscription",
                Some(&user.session_token),
                body,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn invalid_json_body_returns_json_error() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);

    let response = test_app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/checkout/cart")
                .header("content-type", "application/json")
                .header("Authorization", format!("Bearer {}", user.session_token))
                .body(Body::from("{ invalid json }"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json.get("error").is_some());
}
