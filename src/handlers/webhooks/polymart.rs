//! Polymart webhook endpoint.
//!
//! Polymart signs the raw body with HMAC-SHA256 and sends the hex digest in
//! `X-Polymart-Signature`. Only `product.user.purchase` events are
//! fulfilled; the payload's `product_id` must match one of the team's
//! products (configured on the Polymart side when setting up the webhook).

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Path;

use super::{FulfillmentResponse, Purchase, fulfill_purchase};

#[derive(Deserialize)]
struct PolymartEvent {
    event: String,
    /// Provider-side delivery id, used for replay protection
    id: String,
    payload: PolymartPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolymartPayload {
    product_id: String,
    customer_email: String,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    expiration_days: Option<i64>,
}

pub(crate) fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let mut mac: Hmac<Sha256> =
        Hmac::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    let presented = signature_hex.to_ascii_lowercase();
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub async fn handle(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let mut conn = state.db.get()?;
    let team = queries::get_team_by_id(&conn, &team_id)?
        .ok_or_else(|| AppError::NotFound("Team not found".into()))?;

    let Some(encrypted_secret) = &team.polymart_webhook_secret else {
        tracing::warn!("Polymart webhook hit for team {} with no secret configured", team_id);
        return Ok(StatusCode::OK.into_response());
    };
    let secret_bytes = state.master_key.decrypt(&team_id, encrypted_secret)?;
    let secret = String::from_utf8(secret_bytes)
        .map_err(|_| AppError::Crypto("Stored webhook secret is not valid UTF-8".into()))?;

    let signature = headers
        .get("x-polymart-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing X-Polymart-Signature header".into()))?;

    if !verify_signature(&secret, &body, signature) {
        return Err(AppError::Unauthorized);
    }

    let event: PolymartEvent = serde_json::from_slice(&body)?;

    if event.event != "product.user.purchase" {
        return Ok(StatusCode::OK.into_response());
    }

    let purchase = Purchase {
        product_id: event.payload.product_id,
        customer_email: event.payload.customer_email,
        customer_name: event.payload.customer_name,
        expiration_days: event.payload.expiration_days,
    };

    // Replay record and fulfillment commit together; a failed fulfillment
    // leaves the event id unconsumed for the provider's retry.
    let tx = conn.transaction()?;
    if !queries::record_webhook_event(&tx, "polymart", &event.id)? {
        tracing::debug!("Duplicate Polymart event {}, skipping", event.id);
        return Ok(StatusCode::OK.into_response());
    }
    let issued = fulfill_purchase(&tx, &state, &team_id, &purchase)?;
    tx.commit()?;

    Ok(Json(FulfillmentResponse {
        license_id: issued.license.id.clone(),
    })
    .into_response())
}
