//! The external heartbeat/verify endpoint.
//!
//! `POST /v1/license/{team_id}/heartbeat` runs the validation pipeline and
//! always answers with a structured verdict; the HTTP status mirrors the
//! verdict code. Infrastructure failures never leak details: they come back
//! as a generic INTERNAL_SERVER_ERROR verdict, and callers treat anything
//! non-VALID as "do not unlock".

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::models::RequestType;
use crate::util;
use crate::validation::{Outcome, ValidationContext, Validator, Verdict, VerdictCode};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub license_key: String,
    pub client_identifier: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    /// Client nonce to be signed with the team's private key
    #[serde(default)]
    pub challenge: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub result: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_response: Option<String>,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: std::result::Result<Json<HeartbeatRequest>, crate::error::AppError>,
) -> Result<impl IntoResponse> {
    // A body that does not parse still gets the verdict envelope, like
    // every other denial on this route
    let Ok(Json(req)) = payload else {
        let verdict = Verdict::denied(VerdictCode::BadRequest);
        return Ok((
            verdict.code.status(),
            Json(HeartbeatResponse {
                result: verdict,
                challenge_response: None,
            }),
        ));
    };

    let conn = state.db.get()?;
    let ip_address = util::client_ip(&headers, peer);

    let ctx = ValidationContext {
        customer_id: req.customer_id.clone(),
        product_id: req.product_id.clone(),
        client_identifier: req.client_identifier.clone(),
        ip_address: ip_address.clone(),
        challenge: req.challenge.clone(),
    };

    let validator = Validator::new(&conn, &state.lookup, &state.master_key);
    let outcome = match validator.validate(&team_id, &req.license_key, &ctx) {
        Ok(outcome) => outcome,
        Err(e) => {
            // Fail closed: the caller sees a denial, the details stay here
            tracing::error!("Validation error for team {}: {}", team_id, e);
            Outcome {
                verdict: Verdict::denied(VerdictCode::InternalServerError),
                challenge_response: None,
                license_id: None,
            }
        }
    };

    let code = outcome.verdict.code;

    // Append-only outcome log; also feeds the distinct-IP accounting.
    // Skipped when the team itself did not resolve.
    if !matches!(code, VerdictCode::TeamNotFound | VerdictCode::BadRequest) {
        if let Err(e) = queries::create_request_log(
            &conn,
            &team_id,
            outcome.license_id.as_deref(),
            &ip_address,
            RequestType::Heartbeat,
            code.as_str(),
            code.status().as_u16() as i64,
        ) {
            tracing::warn!("Failed to record request log for team {}: {}", team_id, e);
        }
    }

    Ok((
        code.status(),
        Json(HeartbeatResponse {
            result: outcome.verdict,
            challenge_response: outcome.challenge_response,
        }),
    ))
}
