//! Subscription API tests: free-plan activation, cancellation, and the
//! status endpoint including its degraded fallback.

#[path = "common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::json;
use tower::ServiceExt;

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============ Free plan ============

#[tokio::test]
async fn free_plan_activation_grants_thirty_days() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);
    let before = now();

    let response = test_app(state.clone())
        .oneshot(post_json(
            "/api/subscriptions/free",
            &user.session_token,
            json!({ "plan": "free", "duration": "1m" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let subs = queries::list_subscriptions_for_user(&conn, &user.id).unwrap();
    assert_eq!(subs.len(), 1);
    assert!(subs[0].is_active);
    assert_eq!(subs[0].plan, "free");
    let expected = before + 30 * 86_400;
    assert!((subs[0].expires_at - expected).abs() <= 5);

    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert!(user.subscribed);
}

#[tokio::test]
async fn free_plan_is_limited_to_one_month() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);

    for duration in ["6m", "12m"] {
        let response = test_app(state.clone())
            .oneshot(post_json(
                "/api/subscriptions/free",
                &user.session_token,
                json!({ "plan": "free", "duration": duration }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let conn = state.db.get().unwrap();
    assert!(queries::list_subscriptions_for_user(&conn, &user.id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn free_plan_is_refused_while_a_subscription_is_live() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);
    {
        let conn = state.db.get().unwrap();
        let now = now();
        queries::create_subscription(
            &conn,
            &user.id,
            "pro",
            "12m",
            now,
            now + 365 * 86_400,
            Some("sub_paid"),
        )
        .unwrap();
    }

    let response = test_app(state.clone())
        .oneshot(post_json(
            "/api/subscriptions/free",
            &user.session_token,
            json!({ "plan": "free", "duration": "1m" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn paid_plan_cannot_use_the_free_activation_endpoint() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);

    let response = test_app(state)
        .oneshot(post_json(
            "/api/subscriptions/free",
            &user.session_token,
            json!({ "plan": "pro", "duration": "1m" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============ Cancellation ============

#[tokio::test]
async fn cancel_deactivates_and_clears_the_flag() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);
    {
        let mut conn = state.db.get().unwrap();
        let tx = conn.transaction().unwrap();
        let now = now();
        queries::create_subscription(
            &tx,
            &user.id,
            "basic",
            "1m",
            now,
            now + 30 * 86_400,
            Some("sub_x"),
        )
        .unwrap();
        queries::set_user_subscribed(&tx, &user.id, true).unwrap();
        tx.commit().unwrap();
    }

    let response = test_app(state.clone())
        .oneshot(post_json(
            "/api/subscriptions/cancel",
            &user.session_token,
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let subs = queries::list_subscriptions_for_user(&conn, &user.id).unwrap();
    assert!(subs.iter().all(|s| !s.is_active));
    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert!(!user.subscribed);
}

// ============ Status ============

#[tokio::test]
async fn status_requires_a_bearer_token() {
    let state = create_test_app_state();

    let response = test_app(state)
        .oneshot(get("/api/subscriptions/status", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_reports_none_without_a_subscription() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);

    let response = test_app(state)
        .oneshot(get("/api/subscriptions/status", Some(&user.session_token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "none");
    assert!(json["subscription"].is_null());
    assert_eq!(json["degraded"], false);
}

#[tokio::test]
async fn status_reports_the_live_subscription() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);
    {
        let conn = state.db.get().unwrap();
        let now = now();
        queries::create_subscription(
            &conn,
            &user.id,
            "pro",
            "6m",
            now,
            now + 180 * 86_400,
            Some("sub_live"),
        )
        .unwrap();
    }

    let response = test_app(state)
        .oneshot(get("/api/subscriptions/status", Some(&user.session_token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "active");
    assert_eq!(json["subscription"]["plan"], "pro");
    assert_eq!(json["degraded"], false);
}

#[tokio::test]
async fn status_expired_subscription_counts_as_none() {
    let state = create_test_app_state();
    let user = create_test_user(&state, "fan@example.com", false);
    {
        let conn = state.db.get().unwrap();
        let now = now();
        queries::create_subscription(
            &conn,
            &user.id,
            "basic",
            "1m",
            now - 60 * 86_400,
            now - 30 * 86_400,
            Some("sub_old"),
        )
        .unwrap();
    }

    let response = test_app(state)
        .oneshot(get("/api/subscriptions/status", Some(&user.session_token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "none");
}

#[tokio::test]
async fn status_degrades_instead_of_failing_when_storage_is_down() {
    let (state, _held) = create_broken_app_state();

    let response = test_app(state)
        .oneshot(get("/api/subscriptions/status", Some("ps_whatever")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["degraded"], true);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["subscription"]["plan"], "free");
    assert_eq!(json["subscription"]["is_active"], true);
}
