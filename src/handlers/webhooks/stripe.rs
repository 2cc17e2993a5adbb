//! Stripe webhook endpoint.
//!
//! Verifies the `Stripe-Signature` header (HMAC-SHA256 over `{t}.{body}`
//! with a timestamp tolerance) and fulfills `checkout.session.completed`
//! events. The target product id and optional license duration come from
//! the checkout session's metadata.

use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Path;

use super::{FulfillmentResponse, Purchase, fulfill_purchase};

/// Maximum accepted clock skew between the signature timestamp and now.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

#[derive(Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: CheckoutSession,
}

#[derive(Deserialize)]
struct CheckoutSession {
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct CustomerDetails {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Check a `Stripe-Signature` header value against the raw body.
///
/// The header carries `t=<unix ts>,v1=<hex hmac>[,v1=...]`; the signed
/// payload is `{t}.{body}`. Any matching v1 entry within the timestamp
/// tolerance passes.
pub(crate) fn verify_signature(secret: &str, body: &[u8], header: &str, now: i64) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let Some(ts) = timestamp else { return false };
    if (now - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
        return false;
    }

    let mut mac: Hmac<Sha256> =
        Hmac::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    candidates.iter().any(|c| {
        c.len() == expected.len()
            && c.bytes()
                .zip(expected.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    })
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

    let Some(encrypted_secret) = &team.stripe_webhook_secret else {
        tracing::warn!("Stripe webhook hit for team {} with no secret configured", team_id);
        return Ok(StatusCode::OK.into_response());
    };
    let secret_bytes = state.master_key.decrypt(&team_id, encrypted_secret)?;
    let secret = String::from_utf8(secret_bytes)
        .map_err(|_| AppError::Crypto("Stored webhook secret is not valid UTF-8".into()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".into()))?;

    if !verify_signature(&secret, &body, signature, Utc::now().timestamp()) {
        return Err(AppError::Unauthorized);
    }

    let event: StripeEvent = serde_json::from_slice(&body)?;

    if event.event_type != "checkout.session.completed" {
        return Ok(StatusCode::OK.into_response());
    }

    let session = event.data.object;
    let email = session
        .customer_details
        .as_ref()
        .and_then(|d| d.email.clone())
        .or(session.customer_email)
        .ok_or_else(|| AppError::BadRequest("Checkout session has no customer email".into()))?;
    let Some(product_id) = session.metadata.get("product_id") else {
        tracing::warn!("Stripe event {} has no product_id metadata, ignoring", event.id);
        return Ok(StatusCode::OK.into_response());
    };
    let expiration_days = session
        .metadata
        .get("expiration_days")
        .and_then(|v| v.parse().ok());

    let purchase = Purchase {
        product_id: product_id.clone(),
        customer_email: email,
        customer_name: session.customer_details.and_then(|d| d.name),
        expiration_days,
    };

    // The replay record commits together with fulfillment: a failed
    // fulfillment rolls both back, so the provider's retry is not dropped
    // as a replay.
    let tx = conn.transaction()?;
    if !queries::record_webhook_event(&tx, "stripe", &event.id)? {
        tracing::debug!("Duplicate Stripe event {}, skipping", event.id);
        return Ok(StatusCode::OK.into_response());
    }
    let issued = fulfill_purchase(&tx, &state, &team_id, &purchase)?;
    tx.commit()?;

    Ok(Json(FulfillmentResponse {
        license_id: issued.license.id.clone(),
    })
    .into_response())
}
