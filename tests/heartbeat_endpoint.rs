//! Tests for POST /v1/license/{team_id}/heartbeat.
//!
//! The endpoint always answers with a verdict envelope; the HTTP status
//! mirrors the verdict code.

use axum::{body::Body, http::Request};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::*;

fn heartbeat_request(team_id: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/v1/license/{}/heartbeat", team_id))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).expect("Response should be valid JSON")
}

/// Seed a team with a key pair and one license, returning (state, team_id,
/// public_key)
fn setup_heartbeat_test(license_key: &str) -> (AppState, String, String) {
    let state = create_test_app_state();
    let team_id;
    let public_key;
    {
        let conn = state.db.get().unwrap();
        let (team, pk) = create_test_team_with_keys(&conn, &state.master_key);
        create_test_license(&conn, &team.id, &license_input(license_key));
        team_id = team.id;
        public_key = pk;
    }
    (state, team_id, public_key)
}

#[tokio::test]
async fn test_valid_heartbeat_returns_200() {
    let (state, team_id, _) = setup_heartbeat_test("KG-AAAAA");
    let app = test_app(state.clone());

    let response = app
        .oneshot(heartbeat_request(
            &team_id,
            json!({"licenseKey": "KG-AAAAA", "clientIdentifier": "client-1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["result"]["code"], "VALID");
    assert_eq!(body["result"]["valid"], true);
    assert!(body.get("challengeResponse").is_none());

    // The seat is recorded
    let conn = state.db.get().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM heartbeats", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_challenge_response_verifies() {
    let (state, team_id, public_key) = setup_heartbeat_test("KG-AAAAA");
    let app = test_app(state);

    let response = app
        .oneshot(heartbeat_request(
            &team_id,
            json!({
                "licenseKey": "KG-AAAAA",
                "clientIdentifier": "client-1",
                "challenge": "nonce-abc"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response_json(response).await;
    let signature = body["challengeResponse"]
        .as_str()
        .expect("challenge is answered on VALID");
    assert!(crypto::verify_challenge("nonce-abc", signature, &public_key).unwrap());
}

#[tokio::test]
async fn test_unknown_team_returns_404() {
    let state = create_test_app_state();
    let app = test_app(state);

    let response = app
        .oneshot(heartbeat_request(
            "no-such-team",
            json!({"licenseKey": "KG-AAAAA", "clientIdentifier": "client-1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["result"]["code"], "TEAM_NOT_FOUND");
    assert_eq!(body["result"]["valid"], false);
}

#[tokio::test]
async fn test_unknown_license_returns_404() {
    let (state, team_id, _) = setup_heartbeat_test("KG-AAAAA");
    let app = test_app(state);

    let response = app
        .oneshot(heartbeat_request(
            &team_id,
            json!({"licenseKey": "KG-WRONG", "clientIdentifier": "client-1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["result"]["code"], "LICENSE_NOT_FOUND");
}

#[tokio::test]
async fn test_suspended_license_returns_403() {
    let state = create_test_app_state();
    let team_id;
    {
        let conn = state.db.get().unwrap();
        let team = create_test_team(&conn, "Test Team");
        let mut input = license_input("KG-AAAAA");
        input.suspended = true;
        create_test_license(&conn, &team.id, &input);
        team_id = team.id;
    }
    let app = test_app(state);

    let response = app
        .oneshot(heartbeat_request(
            &team_id,
            json!({"licenseKey": "KG-AAAAA", "clientIdentifier": "client-1"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["result"]["code"], "LICENSE_SUSPENDED");
}

#[tokio::test]
async fn test_malformed_body_returns_400() {
    let (state, team_id, _) = setup_heartbeat_test("KG-AAAAA");
    let app = test_app(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/v1/license/{}/heartbeat", team_id))
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    // Unparseable bodies still get the verdict envelope
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["result"]["code"], "BAD_REQUEST");
    assert_eq!(body["result"]["valid"], false);

    // Same for a body missing required fields
    let response = app
        .oneshot(heartbeat_request(&team_id, json!({"licenseKey": "KG-AAAAA"})))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["result"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_missing_client_identifier_returns_400() {
    let (state, team_id, _) = setup_heartbeat_test("KG-AAAAA");
    let app = test_app(state);

    let response = app
        .oneshot(heartbeat_request(
            &team_id,
            json!({"licenseKey": "KG-AAAAA", "clientIdentifier": "  "}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["result"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_attempt_is_request_logged() {
    let (state, team_id, _) = setup_heartbeat_test("KG-AAAAA");
    let app = test_app(state.clone());

    // One valid, one denied attempt
    app.clone()
        .oneshot(heartbeat_request(
            &team_id,
            json!({"licenseKey": "KG-AAAAA", "clientIdentifier": "client-1"}),
        ))
        .await
        .unwrap();
    app.oneshot(heartbeat_request(
        &team_id,
        json!({"licenseKey": "KG-WRONG", "clientIdentifier": "client-1"}),
    ))
    .await
    .unwrap();

    let conn = state.db.get().unwrap();
    let statuses: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT status FROM request_logs ORDER BY status")
            .unwrap();
        let rows = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        rows
    };
    assert_eq!(
        statuses,
        vec!["LICENSE_NOT_FOUND".to_string(), "VALID".to_string()]
    );
}

#[tokio::test]
async fn test_forwarded_ip_feeds_the_ip_limit() {
    let state = create_test_app_state();
    let team_id;
    {
        let conn = state.db.get().unwrap();
        let team = create_test_team(&conn, "Test Team");
        let mut input = license_input("KG-AAAAA");
        input.ip_limit = Some(1);
        create_test_license(&conn, &team.id, &input);
        team_id = team.id;
    }
    let app = test_app(state);

    let request = |ip: &str| {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/license/{}/heartbeat", team_id))
            .header("content-type", "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(
                json!({"licenseKey": "KG-AAAAA", "clientIdentifier": "client-1"}).to_string(),
            ))
            .unwrap()
    };

    let first = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
    assert_eq!(first.status(), axum::http::StatusCode::OK);

    // Same client, second IP: over the limit of 1
    let second = app.clone().oneshot(request("203.0.113.2")).await.unwrap();
    assert_eq!(second.status(), axum::http::StatusCode::FORBIDDEN);
    let body = response_json(second).await;
    assert_eq!(body["result"]["code"], "IP_LIMIT_REACHED");

    // Retrying from the denied IP stays denied; the logged denial must not
    // admit the IP into the window
    let retry = app.oneshot(request("203.0.113.2")).await.unwrap();
    assert_eq!(retry.status(), axum::http::StatusCode::FORBIDDEN);
    let body = response_json(retry).await;
    assert_eq!(body["result"]["code"], "IP_LIMIT_REACHED");
}
