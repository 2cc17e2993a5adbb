//! Tests for the payment provider webhook endpoints: signature checks,
//! replay protection and purchase fulfillment.

use axum::{body::Body, http::Request};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tower::ServiceExt;

mod common;
use common::*;

const STRIPE_SECRET: &str = "whsec_test_secret";
const POLYMART_SECRET: &str = "pm_test_secret";

/// Seed a team with encrypted webhook secrets and one product, returning
/// (state, team_id, product_id)
fn setup_webhook_test() -> (AppState, String, String) {
    let state = create_test_app_state();
    let team_id;
    let product_id;
    {
        let conn = state.db.get().unwrap();
        let team = create_test_team(&conn, "Test Team");
        let stripe = state
            .master_key
            .encrypt(&team.id, STRIPE_SECRET.as_bytes())
            .unwrap();
        let polymart = state
            .master_key
            .encrypt(&team.id, POLYMART_SECRET.as_bytes())
            .unwrap();
        queries::set_team_webhook_secrets(&conn, &team.id, Some(&stripe), Some(&polymart))
            .unwrap();
        let product = create_test_product(&conn, &team.id, "Pro");
        team_id = team.id;
        product_id = product.id;
    }
    (state, team_id, product_id)
}

fn stripe_signature(secret: &str, body: &str) -> String {
    let ts = now();
    let mut mac: Hmac<Sha256> = Hmac::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.", ts).as_bytes());
    mac.update(body.as_bytes());
    format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

fn polymart_signature(secret: &str, body: &str) -> String {
    let mut mac: Hmac<Sha256> = Hmac::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn stripe_event(event_id: &str, product_id: &str) -> String {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "customer_details": {"email": "buyer@example.com", "name": "Buyer"},
                "metadata": {"product_id": product_id, "expiration_days": "365"}
            }
        }
    })
    .to_string()
}

fn stripe_request(team_id: &str, body: String, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/stripe/{}", team_id))
        .header("content-type", "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).expect("Response should be valid JSON")
}

fn license_count(state: &AppState) -> i64 {
    let conn = state.db.get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM licenses", [], |r| r.get(0))
        .unwrap()
}

#[tokio::test]
async fn test_stripe_purchase_issues_license() {
    let (state, team_id, product_id) = setup_webhook_test();
    let app = test_app(state.clone());

    let body = stripe_event("evt_1", &product_id);
    let signature = stripe_signature(STRIPE_SECRET, &body);
    let response = app
        .oneshot(stripe_request(&team_id, body, &signature))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let json = response_json(response).await;
    let license_id = json["licenseId"].as_str().expect("fulfillment returns the license id");

    let conn = state.db.get().unwrap();
    let license = queries::get_license_by_id(&conn, license_id)
        .unwrap()
        .expect("license exists");
    assert_eq!(license.expiration_days, Some(365));

    // Bound to the purchased product and the buyer
    let products = queries::products_for_license(&conn, license_id).unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].id, product_id);
    let customers = queries::customers_for_license(&conn, license_id).unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].email.as_deref(), Some("buyer@example.com"));
}

#[tokio::test]
async fn test_stripe_bad_signature_rejected() {
    let (state, team_id, product_id) = setup_webhook_test();
    let app = test_app(state.clone());

    let body = stripe_event("evt_1", &product_id);
    let signature = stripe_signature("whsec_wrong", &body);
    let response = app
        .oneshot(stripe_request(&team_id, body, &signature))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    assert_eq!(license_count(&state), 0);
}

#[tokio::test]
async fn test_stripe_replay_is_dropped() {
    let (state, team_id, product_id) = setup_webhook_test();
    let app = test_app(state.clone());

    let body = stripe_event("evt_1", &product_id);
    let signature = stripe_signature(STRIPE_SECRET, &body);

    let first = app
        .clone()
        .oneshot(stripe_request(&team_id, body.clone(), &signature))
        .await
        .unwrap();
    assert_eq!(first.status(), axum::http::StatusCode::OK);

    let second = app
        .oneshot(stripe_request(&team_id, body, &signature))
        .await
        .unwrap();
    assert_eq!(second.status(), axum::http::StatusCode::OK);

    // Only the first delivery fulfilled
    assert_eq!(license_count(&state), 1);
}

#[tokio::test]
async fn test_stripe_failed_fulfillment_does_not_consume_event_id() {
    let (state, team_id, product_id) = setup_webhook_test();
    let app = test_app(state.clone());

    // First delivery references a product that does not exist yet, so
    // fulfillment fails
    let body = stripe_event("evt_retry", "missing-product");
    let signature = stripe_signature(STRIPE_SECRET, &body);
    let response = app
        .clone()
        .oneshot(stripe_request(&team_id, body, &signature))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(license_count(&state), 0);

    // The provider retries the same event id once the shop is fixed up; the
    // failed attempt must not have burned the id as a replay
    let body = stripe_event("evt_retry", &product_id);
    let signature = stripe_signature(STRIPE_SECRET, &body);
    let response = app
        .oneshot(stripe_request(&team_id, body, &signature))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    assert_eq!(license_count(&state), 1);
}

#[tokio::test]
async fn test_stripe_ignores_other_event_types() {
    let (state, team_id, _) = setup_webhook_test();
    let app = test_app(state.clone());

    let body = json!({
        "id": "evt_2",
        "type": "invoice.paid",
        "data": {"object": {}}
    })
    .to_string();
    let signature = stripe_signature(STRIPE_SECRET, &body);
    let response = app
        .oneshot(stripe_request(&team_id, body, &signature))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    assert_eq!(license_count(&state), 0);
}

#[tokio::test]
async fn test_stripe_unconfigured_team_acks_without_fulfilling() {
    let state = create_test_app_state();
    let team_id = {
        let conn = state.db.get().unwrap();
        create_test_team(&conn, "Test Team").id
    };
    let app = test_app(state.clone());

    let body = stripe_event("evt_1", "some-product");
    let signature = stripe_signature(STRIPE_SECRET, &body);
    let response = app
        .oneshot(stripe_request(&team_id, body, &signature))
        .await
        .unwrap();

    // 200 so the provider stops retrying
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    assert_eq!(license_count(&state), 0);
}

#[tokio::test]
async fn test_polymart_purchase_issues_license() {
    let (state, team_id, product_id) = setup_webhook_test();
    let app = test_app(state.clone());

    let body = json!({
        "event": "product.user.purchase",
        "id": "pm_evt_1",
        "payload": {
            "productId": product_id,
            "customerEmail": "buyer@example.com"
        }
    })
    .to_string();
    let signature = polymart_signature(POLYMART_SECRET, &body);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/polymart/{}", team_id))
                .header("content-type", "application/json")
                .header("x-polymart-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let json = response_json(response).await;
    assert!(json["licenseId"].is_string());
    assert_eq!(license_count(&state), 1);
}

#[tokio::test]
async fn test_polymart_bad_signature_rejected() {
    let (state, team_id, product_id) = setup_webhook_test();
    let app = test_app(state.clone());

    let body = json!({
        "event": "product.user.purchase",
        "id": "pm_evt_1",
        "payload": {
            "productId": product_id,
            "customerEmail": "buyer@example.com"
        }
    })
    .to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/polymart/{}", team_id))
                .header("content-type", "application/json")
                .header("x-polymart-signature", "deadbeef")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
    assert_eq!(license_count(&state), 0);
}
