use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::crypto::{LookupHasher, MasterKey};
use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    CUSTOMER_COLS, FromRow, HEARTBEAT_COLS, KEY_PAIR_COLS, LICENSE_COLS, PRODUCT_COLS,
    REQUEST_LOG_COLS, SETTINGS_COLS, TEAM_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a random license key: `PREFIX-XXXXX-XXXXX-XXXXX-XXXXX`.
/// The alphabet omits easily-confused characters (0/O, 1/I).
pub fn generate_license_key(prefix: &str) -> String {
    use rand::Rng;

    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    let mut group = || -> String {
        (0..5)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    };
    let (a, b, c, d) = (group(), group(), group(), group());
    format!("{}-{}-{}-{}-{}", prefix, a, b, c, d)
}

// ============ Teams ============

pub fn create_team(conn: &Connection, name: &str) -> Result<Team> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO teams (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![&id, name, now],
    )?;

    Ok(Team {
        id,
        name: name.to_string(),
        created_at: now,
        stripe_webhook_secret: None,
        polymart_webhook_secret: None,
    })
}

pub fn count_teams(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM teams", [], |row| row.get(0))
        .map_err(Into::into)
}

pub fn get_team_by_id(conn: &Connection, id: &str) -> Result<Option<Team>> {
    query_one(
        conn,
        &format!("SELECT {} FROM teams WHERE id = ?1", TEAM_COLS),
        &[&id],
    )
}

/// Store encrypted webhook signing secrets for a team.
pub fn set_team_webhook_secrets(
    conn: &Connection,
    team_id: &str,
    stripe: Option<&[u8]>,
    polymart: Option<&[u8]>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE teams SET stripe_webhook_secret = ?1, polymart_webhook_secret = ?2 WHERE id = ?3",
        params![stripe, polymart, team_id],
    )?;
    Ok(affected > 0)
}

// ============ Team settings ============

/// Load a team's settings, resolving defaults when no row exists.
/// This is the only place defaults are applied; the validation pipeline
/// always sees a fully-populated struct.
pub fn get_team_settings(conn: &Connection, team_id: &str) -> Result<TeamSettings> {
    let settings: Option<TeamSettings> = query_one(
        conn,
        &format!(
            "SELECT {} FROM team_settings WHERE team_id = ?1",
            SETTINGS_COLS
        ),
        &[&team_id],
    )?;
    Ok(settings.unwrap_or_default())
}

pub fn upsert_team_settings(
    conn: &Connection,
    team_id: &str,
    settings: &TeamSettings,
) -> Result<()> {
    conn.execute(
        "INSERT INTO team_settings (team_id, strict_customers, strict_products, heartbeat_timeout_minutes, ip_limit_period)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(team_id) DO UPDATE SET
             strict_customers = excluded.strict_customers,
             strict_products = excluded.strict_products,
             heartbeat_timeout_minutes = excluded.heartbeat_timeout_minutes,
             ip_limit_period = excluded.ip_limit_period",
        params![
            team_id,
            settings.strict_customers as i64,
            settings.strict_products as i64,
            settings.heartbeat_timeout_minutes,
            settings.ip_limit_period.as_str(),
        ],
    )?;
    Ok(())
}

// ============ Key pairs ============

pub fn create_key_pair(
    conn: &Connection,
    team_id: &str,
    encrypted_private_key: &[u8],
    public_key: &str,
) -> Result<KeyPair> {
    let now = now();
    conn.execute(
        "INSERT INTO key_pairs (team_id, private_key, public_key, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![team_id, encrypted_private_key, public_key, now],
    )?;

    Ok(KeyPair {
        team_id: team_id.to_string(),
        private_key: encrypted_private_key.to_vec(),
        public_key: public_key.to_string(),
        created_at: now,
    })
}

pub fn get_key_pair(conn: &Connection, team_id: &str) -> Result<Option<KeyPair>> {
    query_one(
        conn,
        &format!("SELECT {} FROM key_pairs WHERE team_id = ?1", KEY_PAIR_COLS),
        &[&team_id],
    )
}

// ============ Customers ============

pub fn create_customer(conn: &Connection, team_id: &str, input: &CreateCustomer) -> Result<Customer> {
    let id = gen_id();
    let now = now();
    let email = input.email.as_ref().map(|e| e.trim().to_lowercase());

    conn.execute(
        "INSERT INTO customers (id, team_id, name, email, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, team_id, &input.name, &email, now],
    )?;

    Ok(Customer {
        id,
        team_id: team_id.to_string(),
        name: input.name.clone(),
        email,
        created_at: now,
    })
}

pub fn get_customer_by_id(conn: &Connection, team_id: &str, id: &str) -> Result<Option<Customer>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM customers WHERE id = ?1 AND team_id = ?2",
            CUSTOMER_COLS
        ),
        &[&id, &team_id],
    )
}

pub fn get_customer_by_email(
    conn: &Connection,
    team_id: &str,
    email: &str,
) -> Result<Option<Customer>> {
    let email = email.trim().to_lowercase();
    query_one(
        conn,
        &format!(
            "SELECT {} FROM customers WHERE team_id = ?1 AND email = ?2",
            CUSTOMER_COLS
        ),
        &[&team_id, &email],
    )
}

pub fn customers_for_license(conn: &Connection, license_id: &str) -> Result<Vec<Customer>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM customers c
             JOIN license_customers lc ON lc.customer_id = c.id
             WHERE lc.license_id = ?1",
            "c.id, c.team_id, c.name, c.email, c.created_at"
        ),
        &[&license_id],
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, team_id: &str, input: &CreateProduct) -> Result<Product> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO products (id, team_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![&id, team_id, &input.name, now],
    )?;

    Ok(Product {
        id,
        team_id: team_id.to_string(),
        name: input.name.clone(),
        created_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, team_id: &str, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM products WHERE id = ?1 AND team_id = ?2",
            PRODUCT_COLS
        ),
        &[&id, &team_id],
    )
}

pub fn products_for_license(conn: &Connection, license_id: &str) -> Result<Vec<Product>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM products p
             JOIN license_products lp ON lp.product_id = p.id
             WHERE lp.license_id = ?1",
            "p.id, p.team_id, p.name, p.created_at"
        ),
        &[&license_id],
    )
}

// ============ Licenses ============

fn validate_expiration_input(input: &CreateLicense) -> Result<()> {
    match input.expiration_type {
        ExpirationType::Date => {
            if input.expiration_date.is_none() {
                return Err(AppError::BadRequest(
                    "expiration_date is required for DATE expiration".into(),
                ));
            }
        }
        ExpirationType::Duration => match input.expiration_days {
            Some(days) if days > 0 => {}
            _ => {
                return Err(AppError::BadRequest(
                    "expiration_days must be positive for DURATION expiration".into(),
                ));
            }
        },
        ExpirationType::None => {}
    }
    Ok(())
}

/// Issue a new license.
///
/// Derives the lookup hash, enforces per-team uniqueness of the plaintext
/// key (the only point where duplicates can be detected), encrypts the key
/// and binds the given customers and products.
///
/// For DURATION licenses the expiration date stays NULL until the first
/// successful validation fixes it.
pub fn issue_license(
    conn: &Connection,
    lookup: &LookupHasher,
    master_key: &MasterKey,
    team_id: &str,
    input: &CreateLicense,
) -> Result<License> {
    let key = input.license_key.trim();
    if key.is_empty() {
        return Err(AppError::BadRequest("license_key must not be empty".into()));
    }
    validate_expiration_input(input)?;

    let lookup_hash = lookup.hash(key, team_id);

    let existing: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM licenses WHERE team_id = ?1 AND license_key_lookup = ?2",
            params![team_id, &lookup_hash],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(AppError::Conflict(
            "A license with this key already exists for this team".into(),
        ));
    }

    // Resolve bindings before inserting anything
    for customer_id in &input.customer_ids {
        if get_customer_by_id(conn, team_id, customer_id)?.is_none() {
            return Err(AppError::BadRequest(format!(
                "Unknown customer: {}",
                customer_id
            )));
        }
    }
    for product_id in &input.product_ids {
        if get_product_by_id(conn, team_id, product_id)?.is_none() {
            return Err(AppError::BadRequest(format!(
                "Unknown product: {}",
                product_id
            )));
        }
    }

    let id = gen_id();
    let now = now();
    let encrypted_key = master_key.encrypt(team_id, key.as_bytes())?;
    let expiration_start = input.expiration_start.unwrap_or(ExpirationStart::Activation);
    // DATE licenses carry their date from issuance; DURATION starts unset
    let expiration_date = match input.expiration_type {
        ExpirationType::Date => input.expiration_date,
        _ => None,
    };

    // License row and binding rows land together or not at all; a license
    // without its bindings would validate as unbound. A savepoint (rather
    // than BEGIN) keeps this nestable inside a caller's transaction.
    conn.execute_batch("SAVEPOINT issue_license")?;
    let insert_all = || -> Result<()> {
        let inserted = conn.execute(
            "INSERT INTO licenses (id, team_id, license_key, license_key_lookup, suspended,
                 expiration_type, expiration_start, expiration_days, expiration_date,
                 ip_limit, seats, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &id,
                team_id,
                &encrypted_key,
                &lookup_hash,
                input.suspended as i64,
                input.expiration_type.as_str(),
                expiration_start.as_str(),
                input.expiration_days,
                expiration_date,
                input.ip_limit,
                input.seats,
                now,
            ],
        );
        match inserted {
            Ok(_) => {}
            // Lost the uniqueness race to a concurrent issuance
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(AppError::Conflict(
                    "A license with this key already exists for this team".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        for customer_id in &input.customer_ids {
            conn.execute(
                "INSERT OR IGNORE INTO license_customers (license_id, customer_id) VALUES (?1, ?2)",
                params![&id, customer_id],
            )?;
        }
        for product_id in &input.product_ids {
            conn.execute(
                "INSERT OR IGNORE INTO license_products (license_id, product_id) VALUES (?1, ?2)",
                params![&id, product_id],
            )?;
        }
        Ok(())
    };
    match insert_all() {
        Ok(()) => conn.execute_batch("RELEASE issue_license")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK TO issue_license; RELEASE issue_license");
            return Err(e);
        }
    }

    Ok(License {
        id,
        team_id: team_id.to_string(),
        license_key: encrypted_key,
        license_key_lookup: lookup_hash,
        suspended: input.suspended,
        expiration_type: input.expiration_type,
        expiration_start,
        expiration_days: input.expiration_days,
        expiration_date,
        ip_limit: input.ip_limit,
        seats: input.seats,
        created_at: now,
    })
}

pub fn get_license_by_lookup(
    conn: &Connection,
    team_id: &str,
    lookup_hash: &str,
) -> Result<Option<License>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE team_id = ?1 AND license_key_lookup = ?2",
            LICENSE_COLS
        ),
        &[&team_id, &lookup_hash],
    )
}

pub fn get_license_by_id(conn: &Connection, id: &str) -> Result<Option<License>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )
}

/// One-time activation write for DURATION licenses.
///
/// Conditional single-row update: only succeeds while `expiration_date` is
/// still NULL, so concurrent first activations cannot move the date. Returns
/// whether this call performed the write.
pub fn activate_license_expiration(
    conn: &Connection,
    license_id: &str,
    expires_at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET expiration_date = ?1 WHERE id = ?2 AND expiration_date IS NULL",
        params![expires_at, license_id],
    )?;
    Ok(affected > 0)
}

pub fn set_license_suspended(conn: &Connection, license_id: &str, suspended: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE licenses SET suspended = ?1 WHERE id = ?2",
        params![suspended as i64, license_id],
    )?;
    Ok(affected > 0)
}

// ============ Heartbeats ============

/// Create-or-update the heartbeat row for `(license_id, client_identifier)`.
///
/// Atomic upsert; last-writer-wins on `last_beat_at` is fine since the
/// timestamp is monotonically informative, not authoritative state.
pub fn upsert_heartbeat(
    conn: &Connection,
    license_id: &str,
    client_identifier: &str,
    ip_address: Option<&str>,
    now: i64,
) -> Result<Heartbeat> {
    let id = gen_id();
    conn.query_row(
        &format!(
            "INSERT INTO heartbeats (id, license_id, client_identifier, last_beat_at, ip_address)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(license_id, client_identifier) DO UPDATE SET
                 last_beat_at = excluded.last_beat_at,
                 ip_address = excluded.ip_address
             RETURNING {}",
            HEARTBEAT_COLS
        ),
        params![&id, license_id, client_identifier, now, ip_address],
        Heartbeat::from_row,
    )
    .map_err(Into::into)
}

pub fn heartbeats_for_license(conn: &Connection, license_id: &str) -> Result<Vec<Heartbeat>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM heartbeats WHERE license_id = ?1",
            HEARTBEAT_COLS
        ),
        &[&license_id],
    )
}

// ============ Request logs ============

pub fn create_request_log(
    conn: &Connection,
    team_id: &str,
    license_id: Option<&str>,
    ip_address: &str,
    request_type: RequestType,
    status: &str,
    status_code: i64,
) -> Result<RequestLog> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO request_logs (id, team_id, license_id, ip_address, request_type, status, status_code, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![&id, team_id, license_id, ip_address, request_type.as_str(), status, status_code, now],
    )?;

    Ok(RequestLog {
        id,
        team_id: team_id.to_string(),
        license_id: license_id.map(String::from),
        ip_address: ip_address.to_string(),
        request_type,
        status: status.to_string(),
        status_code,
        created_at: now,
    })
}

/// Distinct IPs with a successful validation for a license since the given
/// timestamp. Backs the IP-limit check; the window comes from the team's
/// `ip_limit_period` setting.
///
/// Only VALID outcomes count. Denied attempts are logged too, and a denial
/// must never admit its own IP into the window.
pub fn distinct_ips_for_license(
    conn: &Connection,
    license_id: &str,
    since: i64,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT ip_address FROM request_logs
         WHERE license_id = ?1 AND created_at >= ?2 AND status = 'VALID'",
    )?;
    let rows = stmt
        .query_map(params![license_id, since], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub fn recent_request_logs(
    conn: &Connection,
    license_id: &str,
    limit: i64,
) -> Result<Vec<RequestLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM request_logs WHERE license_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            REQUEST_LOG_COLS
        ),
        &[&license_id, &limit],
    )
}

/// Delete request logs older than the cutoff. Retention only; never called
/// from the validation path.
pub fn prune_request_logs(conn: &Connection, older_than: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM request_logs WHERE created_at < ?1",
        params![older_than],
    )?;
    Ok(deleted)
}

// ============ Webhook events ============

/// Record a webhook event id for replay protection.
/// Returns false if the event was already seen.
pub fn record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![gen_id(), provider, event_id, now()],
    )?;
    Ok(inserted > 0)
}
