use serde::{Deserialize, Serialize};

/// Last-seen record for one client device under a license.
///
/// Unique on `(license_id, client_identifier)`: created on first beat,
/// updated in place on every later one. Staleness (a seat no longer counting
/// as active) is computed at read time, never by deleting rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: String,
    pub license_id: String,
    pub client_identifier: String,
    pub last_beat_at: i64,
    pub ip_address: Option<String>,
}
