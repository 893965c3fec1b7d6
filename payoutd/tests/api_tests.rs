//! HTTP surface tests: routing, validation, scheduler auth, and one full
//! calc -> deposit -> balance flow through the JSON API.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use lib_store::{PayoutStore, RateRuleRow};
use payoutd::api::router;
use payoutd::config::ServiceConfig;
use payoutd::engine::PayoutEngine;

async fn test_app(scheduler_token: Option<&str>) -> Router {
    let store = PayoutStore::open_in_memory().await.unwrap();
    for (role, bps) in [("self", 6_000), ("referral", 1_200), ("center", 2_400)] {
        store
            .insert_rate_rule(&RateRuleRow {
                ref_code: None,
                role: role.into(),
                annual_rate_bps: bps,
                start_date: "2020-01-01".parse().unwrap(),
                end_date: None,
            })
            .await
            .unwrap();
    }

    let config = ServiceConfig {
        scheduler_token: scheduler_token.map(String::from),
        ..ServiceConfig::default()
    };
    router(PayoutEngine::new(store), &config)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_open() {
    let app = test_app(None).await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn malformed_date_is_rejected_before_any_work() {
    let app = test_app(None).await;

    let response = app
        .clone()
        .oneshot(post_json("/payouts/calc", json!({ "date": "06/01/2025" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/payouts?date=yesterday")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let app = test_app(None).await;

    for amount in [-5i64, 0] {
        let response = app
            .clone()
            .oneshot(post_json(
                "/repayments/create",
                json!({ "ref_code": "R001", "amount": amount }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = app
        .oneshot(post_json(
            "/lots/create",
            json!({ "ref_code": "R001", "amount": -1, "invest_date": "2025-01-01" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cron_routes_require_the_scheduler_marker() {
    let app = test_app(Some("hunter2")).await;

    // No marker, no token: rejected
    let response = app
        .clone()
        .oneshot(post_json("/cron/payouts-calc", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Marker header passes
    let request = Request::builder()
        .method("POST")
        .uri("/cron/payouts-calc")
        .header("x-scheduler-cron", "1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Configured token passes
    let request = Request::builder()
        .method("POST")
        .uri("/cron/payouts-deposit")
        .header("x-scheduler-token", "hunter2")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Wrong token is still rejected
    let request = Request::builder()
        .method("POST")
        .uri("/cron/payouts-deposit")
        .header("x-scheduler-token", "wrong")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_are_not_gated_by_scheduler_auth() {
    let app = test_app(Some("hunter2")).await;
    let response = app
        .oneshot(post_json("/payouts/calc", json!({ "date": "2025-06-01" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn full_flow_from_lot_to_balance() {
    let app = test_app(None).await;
    let date = "2025-06-01";

    // Create a lot: 1000.000000 units
    let response = app
        .clone()
        .oneshot(post_json(
            "/lots/create",
            json!({ "ref_code": "OWNER", "amount": 1_000_000_000i64, "invest_date": "2025-01-01" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    assert_eq!(created["maturity_date"], "2026-01-01");

    // Preview does not persist
    let response = app
        .clone()
        .oneshot(post_json("/payouts/calc", json!({ "date": date, "commit": false })))
        .await
        .unwrap();
    let preview = body_json(response).await;
    assert_eq!(preview["rows"].as_array().unwrap().len(), 1);
    assert_eq!(preview["sums"]["repay_sum"], 2_739_726);

    // Commit, then the stored view matches
    let response = app
        .clone()
        .oneshot(post_json("/payouts/calc", json!({ "date": date, "commit": true })))
        .await
        .unwrap();
    let committed = body_json(response).await;
    assert_eq!(committed["upserted"], 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/payouts?date={date}")))
        .await
        .unwrap();
    let stored = body_json(response).await;
    let row = &stored["data"][0];
    assert_eq!(row["status"], "pending");
    assert_eq!(
        row["total_amount"].as_i64().unwrap(),
        row["repay_amount"].as_i64().unwrap() + row["interest_amount"].as_i64().unwrap()
    );

    // Deposit and check the itemized report
    let response = app
        .clone()
        .oneshot(post_json("/payouts/deposit", json!({ "date": date })))
        .await
        .unwrap();
    let report = body_json(response).await;
    assert_eq!(report["succeeded"], 1);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["results"][0]["status"], "deposited");

    // Balance = repay + self interest
    let response = app.clone().oneshot(get("/ledger/OWNER")).await.unwrap();
    let ledger = body_json(response).await;
    assert_eq!(ledger["totals"]["balance"], 2_739_726 + 1_643_835);

    // A cash-out debits it
    let response = app
        .clone()
        .oneshot(post_json(
            "/ledger/entry",
            json!({ "ref_code": "OWNER", "date": date, "reason": "cashout", "amount": 1_000_000 }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["inserted"], true);

    let response = app.oneshot(get("/ledger/OWNER")).await.unwrap();
    let ledger = body_json(response).await;
    assert_eq!(ledger["totals"]["balance"], 2_739_726 + 1_643_835 - 1_000_000);
    assert_eq!(ledger["totals"]["total_out"], 1_000_000);
}
