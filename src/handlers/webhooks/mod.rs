//! Payment provider webhooks.
//!
//! Each provider gets a per-team endpoint. The signing secret is stored
//! encrypted on the team row; verification happens against the raw request
//! body before anything is parsed. Duplicate deliveries are dropped via the
//! `webhook_events` table.
//!
//! Handlers return 200 even for events they ignore (wrong type, provider not
//! configured for the team) so the provider does not keep retrying.

pub mod polymart;
pub mod stripe;

use axum::{Router, routing::post};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{CreateCustomer, CreateLicense, ExpirationStart, ExpirationType, IssuedLicense};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/stripe/{team_id}", post(stripe::handle))
        .route("/webhooks/polymart/{team_id}", post(polymart::handle))
}

/// Normalized purchase extracted from a provider event.
pub(crate) struct Purchase {
    pub product_id: String,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub expiration_days: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FulfillmentResponse {
    pub license_id: String,
}

/// Turn a verified purchase into a license: find or create the customer by
/// email, then issue a fresh key bound to the purchased product.
pub(crate) fn fulfill_purchase(
    conn: &Connection,
    state: &AppState,
    team_id: &str,
    purchase: &Purchase,
) -> Result<IssuedLicense> {
    let product = queries::get_product_by_id(conn, team_id, &purchase.product_id)?
        .ok_or_else(|| AppError::BadRequest(format!("Unknown product: {}", purchase.product_id)))?;

    let customer = match queries::get_customer_by_email(conn, team_id, &purchase.customer_email)? {
        Some(customer) => customer,
        None => queries::create_customer(
            conn,
            team_id,
            &CreateCustomer {
                name: purchase
                    .customer_name
                    .clone()
                    .unwrap_or_else(|| purchase.customer_email.clone()),
                email: Some(purchase.customer_email.clone()),
            },
        )?,
    };

    let license_key_plain = queries::generate_license_key("KG");
    let input = CreateLicense {
        license_key: license_key_plain.clone(),
        customer_ids: vec![customer.id.clone()],
        product_ids: vec![product.id.clone()],
        expiration_type: match purchase.expiration_days {
            Some(_) => ExpirationType::Duration,
            None => ExpirationType::None,
        },
        expiration_start: Some(ExpirationStart::Activation),
        expiration_days: purchase.expiration_days,
        expiration_date: None,
        ip_limit: None,
        seats: None,
        suspended: false,
    };

    let license = queries::issue_license(conn, &state.lookup, &state.master_key, team_id, &input)?;

    tracing::info!(
        "Fulfilled purchase of product {} for customer {} (license {})",
        product.id,
        customer.id,
        license.id
    );

    Ok(IssuedLicense {
        license,
        license_key_plain,
    })
}
