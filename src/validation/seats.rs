//! Active-seat computation.
//!
//! A seat is a client device with a recent enough heartbeat. Staleness is a
//! view over `last_beat_at`, not a state transition: stale rows stay in the
//! table and simply stop counting.

use crate::models::Heartbeat;

/// Whether a heartbeat still counts as an active seat at `now`.
pub fn is_active(heartbeat: &Heartbeat, timeout_minutes: i64, now: i64) -> bool {
    now - heartbeat.last_beat_at <= timeout_minutes * 60
}

/// Filter heartbeats down to the currently active seats. Pure, no side
/// effects.
pub fn active_seats<'a>(
    heartbeats: &'a [Heartbeat],
    timeout_minutes: i64,
    now: i64,
) -> Vec<&'a Heartbeat> {
    heartbeats
        .iter()
        .filter(|hb| is_active(hb, timeout_minutes, now))
        .collect()
}
