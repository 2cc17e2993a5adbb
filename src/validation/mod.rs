//! The license validation state machine.
//!
//! [`Validator::validate`] runs every gating rule in a fixed order and
//! short-circuits on the first failure. Callers depend on that order for
//! their messaging, so checks are never skipped or reordered:
//!
//! 1. resolve team + settings
//! 2. resolve license by lookup hash
//! 3. customer binding
//! 4. product binding
//! 5. suspension
//! 6. expiration (DATE / DURATION with one-time activation / NONE)
//! 7. IP limit (caps new IPs, never known ones)
//! 8. seat limit (an active client always renews its own seat)
//! 9. heartbeat upsert + optional challenge signature

mod seats;
mod verdict;

pub use seats::{active_seats, is_active};
pub use verdict::{Verdict, VerdictCode};

use chrono::Utc;
use rusqlite::Connection;

use crate::crypto::{self, LookupHasher, MasterKey};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{ExpirationStart, ExpirationType, License, TeamSettings};

const SECONDS_PER_DAY: i64 = 86_400;

/// Request context for a validation attempt. `team_id` is always passed
/// explicitly alongside; there is no ambient tenant state.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    pub client_identifier: String,
    pub ip_address: String,
    pub challenge: Option<String>,
}

/// Result of a full validation run.
#[derive(Debug)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Signature over the client challenge, present only on VALID with a
    /// challenge supplied
    pub challenge_response: Option<String>,
    /// License the attempt resolved to, for request logging
    pub license_id: Option<String>,
}

impl Outcome {
    fn denied(code: VerdictCode, license_id: Option<String>) -> Self {
        Self {
            verdict: Verdict::denied(code),
            challenge_response: None,
            license_id,
        }
    }
}

pub struct Validator<'a> {
    conn: &'a Connection,
    lookup: &'a LookupHasher,
    master_key: &'a MasterKey,
}

impl<'a> Validator<'a> {
    pub fn new(conn: &'a Connection, lookup: &'a LookupHasher, master_key: &'a MasterKey) -> Self {
        Self {
            conn,
            lookup,
            master_key,
        }
    }

    /// Run the full validation pipeline for one heartbeat/verify attempt.
    ///
    /// Returns `Ok` with a verdict for every business outcome; `Err` only on
    /// infrastructure failures (storage, crypto), which callers surface as
    /// `INTERNAL_SERVER_ERROR` and treat as fail-closed.
    pub fn validate(
        &self,
        team_id: &str,
        license_key: &str,
        ctx: &ValidationContext,
    ) -> Result<Outcome> {
        let now = Utc::now().timestamp();

        if license_key.trim().is_empty() || ctx.client_identifier.trim().is_empty() {
            return Ok(Outcome::denied(VerdictCode::BadRequest, None));
        }

        // 1. Team + settings
        let Some(team) = queries::get_team_by_id(self.conn, team_id)? else {
            return Ok(Outcome::denied(VerdictCode::TeamNotFound, None));
        };
        let settings = queries::get_team_settings(self.conn, &team.id)?;

        // 2. License by lookup hash
        let lookup_hash = self.lookup.hash(license_key, &team.id);
        let Some(license) = queries::get_license_by_lookup(self.conn, &team.id, &lookup_hash)?
        else {
            return Ok(Outcome::denied(VerdictCode::LicenseNotFound, None));
        };
        let license_id = Some(license.id.clone());

        // 3. Customer binding
        if !self.customer_binding_ok(&license, &settings, ctx)? {
            return Ok(Outcome::denied(VerdictCode::CustomerNotFound, license_id));
        }

        // 4. Product binding
        if !self.product_binding_ok(&license, &settings, ctx)? {
            return Ok(Outcome::denied(VerdictCode::ProductNotFound, license_id));
        }

        // 5. Suspension
        if license.suspended {
            return Ok(Outcome::denied(VerdictCode::LicenseSuspended, license_id));
        }

        // 6. Expiration
        if self.is_expired(&license, now)? {
            return Ok(Outcome::denied(VerdictCode::LicenseExpired, license_id));
        }

        // 7. IP limit
        if !self.ip_limit_ok(&license, &settings, ctx, now)? {
            return Ok(Outcome::denied(VerdictCode::IpLimitReached, license_id));
        }

        // 8. Seats
        if !self.seats_ok(&license, &settings, ctx, now)? {
            return Ok(Outcome::denied(
                VerdictCode::MaximumConcurrentSeats,
                license_id,
            ));
        }

        // 9. Record the seat and answer the challenge
        queries::upsert_heartbeat(
            self.conn,
            &license.id,
            ctx.client_identifier.trim(),
            Some(ctx.ip_address.as_str()),
            now,
        )?;

        let challenge_response = match &ctx.challenge {
            Some(challenge) => Some(self.sign_challenge(&team.id, challenge)?),
            None => None,
        };

        Ok(Outcome {
            verdict: Verdict::valid(),
            challenge_response,
            license_id,
        })
    }

    /// A license with zero bound customers always passes, regardless of
    /// strict mode or any supplied id.
    fn customer_binding_ok(
        &self,
        license: &License,
        settings: &TeamSettings,
        ctx: &ValidationContext,
    ) -> Result<bool> {
        let customers = queries::customers_for_license(self.conn, &license.id)?;
        if customers.is_empty() {
            return Ok(true);
        }
        match &ctx.customer_id {
            None => Ok(!settings.strict_customers),
            Some(id) => Ok(customers.iter().any(|c| &c.id == id)),
        }
    }

    fn product_binding_ok(
        &self,
        license: &License,
        settings: &TeamSettings,
        ctx: &ValidationContext,
    ) -> Result<bool> {
        let products = queries::products_for_license(self.conn, &license.id)?;
        if products.is_empty() {
            return Ok(true);
        }
        match &ctx.product_id {
            None => Ok(!settings.strict_products),
            Some(id) => Ok(products.iter().any(|p| &p.id == id)),
        }
    }

    /// Expiration check. For DURATION licenses the first pass through here
    /// fixes the expiration date with a write-once conditional update; a
    /// concurrent first activation that loses the race re-reads the winner's
    /// date.
    fn is_expired(&self, license: &License, now: i64) -> Result<bool> {
        match license.expiration_type {
            ExpirationType::None => Ok(false),
            ExpirationType::Date => Ok(license.expiration_date.is_some_and(|exp| now > exp)),
            ExpirationType::Duration => {
                let expires_at = match license.expiration_date {
                    Some(exp) => exp,
                    None => {
                        let days = license.expiration_days.ok_or_else(|| {
                            AppError::Internal(format!(
                                "DURATION license {} has no expiration_days",
                                license.id
                            ))
                        })?;
                        let base = match license.expiration_start {
                            ExpirationStart::Creation => license.created_at,
                            ExpirationStart::Activation => now,
                        };
                        let computed = base + days * SECONDS_PER_DAY;
                        if queries::activate_license_expiration(self.conn, &license.id, computed)? {
                            computed
                        } else {
                            // Lost the activation race; use the fixed date
                            queries::get_license_by_id(self.conn, &license.id)?
                                .and_then(|l| l.expiration_date)
                                .unwrap_or(computed)
                        }
                    }
                };
                Ok(now > expires_at)
            }
        }
    }

    /// The IP limit caps *new* IPs: a caller already in the window's
    /// distinct-IP set is always allowed through.
    fn ip_limit_ok(
        &self,
        license: &License,
        settings: &TeamSettings,
        ctx: &ValidationContext,
        now: i64,
    ) -> Result<bool> {
        let Some(limit) = license.ip_limit.filter(|l| *l > 0) else {
            return Ok(true);
        };

        let since = now - settings.ip_limit_period.lookback_secs();
        let existing = queries::distinct_ips_for_license(self.conn, &license.id, since)?;

        if existing.iter().any(|ip| ip == &ctx.ip_address) {
            return Ok(true);
        }
        Ok((existing.len() as i64) < limit)
    }

    /// The seat limit caps concurrent clients: a client with an active
    /// heartbeat always renews its own seat.
    fn seats_ok(
        &self,
        license: &License,
        settings: &TeamSettings,
        ctx: &ValidationContext,
        now: i64,
    ) -> Result<bool> {
        let Some(seats) = license.seats.filter(|s| *s > 0) else {
            return Ok(true);
        };

        let heartbeats = queries::heartbeats_for_license(self.conn, &license.id)?;
        let active = active_seats(&heartbeats, settings.heartbeat_timeout_minutes, now);

        let client = ctx.client_identifier.trim();
        if active.iter().any(|hb| hb.client_identifier == client) {
            return Ok(true);
        }
        Ok((active.len() as i64) < seats)
    }

    fn sign_challenge(&self, team_id: &str, challenge: &str) -> Result<String> {
        let key_pair = queries::get_key_pair(self.conn, team_id)?
            .ok_or_else(|| AppError::Internal(format!("Team {} has no key pair", team_id)))?;
        let private_key = self.master_key.decrypt(team_id, &key_pair.private_key)?;
        crypto::sign_challenge(challenge, &private_key)
    }
}
