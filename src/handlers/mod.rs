pub mod heartbeat;
pub mod licenses;
pub mod webhooks;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;
use crate::rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Public endpoints: health plus the heartbeat/verify protocol.
pub fn public_router(standard_rpm: u32) -> Router<AppState> {
    let protocol = rate_limit::per_ip(
        Router::new().route(
            "/v1/license/{team_id}/heartbeat",
            post(heartbeat::heartbeat),
        ),
        standard_rpm,
    );

    Router::new().route("/health", get(health)).merge(protocol)
}

/// Issuance endpoints, guarded by the service API key.
pub fn admin_router(strict_rpm: u32) -> Router<AppState> {
    rate_limit::per_ip(
        Router::new().route(
            "/v1/teams/{team_id}/licenses",
            post(licenses::issue_license),
        ),
        strict_rpm,
    )
}
