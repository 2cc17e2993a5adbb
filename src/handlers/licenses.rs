//! License issuance API.
//!
//! Guarded by the service API key; not exposed to end-user clients. The
//! plaintext license key is returned exactly once, in the issuance response.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use sha2::{Digest, Sha256};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::models::{CreateLicense, IssuedLicense};
use crate::util;

/// Compare the presented bearer token against the configured service key.
/// Digest comparison keeps the check constant-time.
fn require_service_key(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = &state.service_api_key else {
        return Err(AppError::Unauthorized);
    };
    let Some(token) = util::extract_bearer_token(headers) else {
        return Err(AppError::Unauthorized);
    };

    if Sha256::digest(token.as_bytes()) == Sha256::digest(expected.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

pub async fn issue_license(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<CreateLicense>,
) -> Result<(StatusCode, axum::Json<IssuedLicense>)> {
    require_service_key(&state, &headers)?;

    let conn = state.db.get()?;
    if queries::get_team_by_id(&conn, &team_id)?.is_none() {
        return Err(AppError::NotFound("Team not found".into()));
    }

    let license_key_plain = input.license_key.trim().to_string();
    let license = queries::issue_license(&conn, &state.lookup, &state.master_key, &team_id, &input)?;

    tracing::info!("Issued license {} for team {}", license.id, team_id);

    Ok((
        StatusCode::CREATED,
        axum::Json(IssuedLicense {
            license,
            license_key_plain,
        }),
    ))
}
