//! Rate limiting for public endpoints.
//!
//! Limits are applied per client IP to protect against DoS. Brute-forcing
//! license keys is not the concern here (keys are high entropy); the limits
//! just bound per-IP request volume.
//!
//! Configure via environment variables:
//! - RATE_LIMIT_STANDARD_RPM (default: 60) - heartbeat/verify traffic
//! - RATE_LIMIT_STRICT_RPM (default: 10) - issuance and webhooks

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};

use crate::db::AppState;

/// Wrap a router with a per-IP rate limit of the given requests per minute.
pub fn per_ip(router: Router<AppState>, requests_per_minute: u32) -> Router<AppState> {
    assert!(requests_per_minute > 0, "Rate limit must be greater than 0");

    let period_secs = (60 / requests_per_minute as u64).max(1);
    let config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(period_secs))
            .burst_size(requests_per_minute)
            .finish()
            .expect("Failed to build rate limiter config"),
    );

    router.layer(GovernorLayer::new(config))
}
