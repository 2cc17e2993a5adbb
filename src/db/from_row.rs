//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupted values.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const TEAM_COLS: &str =
    "id, name, created_at, stripe_webhook_secret, polymart_webhook_secret";

pub const SETTINGS_COLS: &str =
    "strict_customers, strict_products, heartbeat_timeout_minutes, ip_limit_period";

pub const KEY_PAIR_COLS: &str = "team_id, private_key, public_key, created_at";

pub const CUSTOMER_COLS: &str = "id, team_id, name, email, created_at";

pub const PRODUCT_COLS: &str = "id, team_id, name, created_at";

pub const LICENSE_COLS: &str = "id, team_id, license_key, license_key_lookup, suspended, expiration_type, expiration_start, expiration_days, expiration_date, ip_limit, seats, created_at";

pub const HEARTBEAT_COLS: &str = "id, license_id, client_identifier, last_beat_at, ip_address";

pub const REQUEST_LOG_COLS: &str =
    "id, team_id, license_id, ip_address, request_type, status, status_code, created_at";

// ============ FromRow Implementations ============

impl FromRow for Team {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Team {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            stripe_webhook_secret: row.get(3)?,
            polymart_webhook_secret: row.get(4)?,
        })
    }
}

impl FromRow for TeamSettings {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TeamSettings {
            strict_customers: row.get::<_, i64>(0)? != 0,
            strict_products: row.get::<_, i64>(1)? != 0,
            heartbeat_timeout_minutes: row.get(2)?,
            ip_limit_period: parse_enum(row, 3, "ip_limit_period")?,
        })
    }
}

impl FromRow for KeyPair {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(KeyPair {
            team_id: row.get(0)?,
            private_key: row.get(1)?,
            public_key: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for Customer {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            team_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            team_id: row.get(1)?,
            name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for License {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            team_id: row.get(1)?,
            license_key: row.get(2)?,
            license_key_lookup: row.get(3)?,
            suspended: row.get::<_, i64>(4)? != 0,
            expiration_type: parse_enum(row, 5, "expiration_type")?,
            expiration_start: parse_enum(row, 6, "expiration_start")?,
            expiration_days: row.get(7)?,
            expiration_date: row.get(8)?,
            ip_limit: row.get(9)?,
            seats: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

impl FromRow for Heartbeat {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Heartbeat {
            id: row.get(0)?,
            license_id: row.get(1)?,
            client_identifier: row.get(2)?,
            last_beat_at: row.get(3)?,
            ip_address: row.get(4)?,
        })
    }
}

impl FromRow for RequestLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(RequestLog {
            id: row.get(0)?,
            team_id: row.get(1)?,
            license_id: row.get(2)?,
            ip_address: row.get(3)?,
            request_type: parse_enum(row, 4, "request_type")?,
            status: row.get(5)?,
            status_code: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}
