use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Closed enumeration of validation outcomes.
///
/// Callers depend on first-failing-check semantics for UX messaging, so
/// codes are never skipped or reordered in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictCode {
    BadRequest,
    TeamNotFound,
    LicenseNotFound,
    CustomerNotFound,
    ProductNotFound,
    LicenseSuspended,
    LicenseExpired,
    IpLimitReached,
    MaximumConcurrentSeats,
    Valid,
    InternalServerError,
}

impl VerdictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictCode::BadRequest => "BAD_REQUEST",
            VerdictCode::TeamNotFound => "TEAM_NOT_FOUND",
            VerdictCode::LicenseNotFound => "LICENSE_NOT_FOUND",
            VerdictCode::CustomerNotFound => "CUSTOMER_NOT_FOUND",
            VerdictCode::ProductNotFound => "PRODUCT_NOT_FOUND",
            VerdictCode::LicenseSuspended => "LICENSE_SUSPENDED",
            VerdictCode::LicenseExpired => "LICENSE_EXPIRED",
            VerdictCode::IpLimitReached => "IP_LIMIT_REACHED",
            VerdictCode::MaximumConcurrentSeats => "MAXIMUM_CONCURRENT_SEATS",
            VerdictCode::Valid => "VALID",
            VerdictCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// HTTP status for this verdict: 400 for malformed requests, 404 for the
    /// not-found family, 403 for business-rule denials, 200 only for VALID.
    pub fn status(&self) -> StatusCode {
        match self {
            VerdictCode::BadRequest => StatusCode::BAD_REQUEST,
            VerdictCode::TeamNotFound
            | VerdictCode::LicenseNotFound
            | VerdictCode::CustomerNotFound
            | VerdictCode::ProductNotFound => StatusCode::NOT_FOUND,
            VerdictCode::LicenseSuspended
            | VerdictCode::LicenseExpired
            | VerdictCode::IpLimitReached
            | VerdictCode::MaximumConcurrentSeats => StatusCode::FORBIDDEN,
            VerdictCode::Valid => StatusCode::OK,
            VerdictCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn details(&self) -> &'static str {
        match self {
            VerdictCode::BadRequest => "Malformed request",
            VerdictCode::TeamNotFound => "Team not found",
            VerdictCode::LicenseNotFound => "License not found",
            VerdictCode::CustomerNotFound => "No matching customer for this license",
            VerdictCode::ProductNotFound => "No matching product for this license",
            VerdictCode::LicenseSuspended => "License is suspended",
            VerdictCode::LicenseExpired => "License has expired",
            VerdictCode::IpLimitReached => "IP address limit reached",
            VerdictCode::MaximumConcurrentSeats => "Maximum concurrent seats reached",
            VerdictCode::Valid => "License is valid",
            VerdictCode::InternalServerError => "Internal server error",
        }
    }
}

/// Structured result of a validation attempt, returned on every path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub timestamp: i64,
    pub valid: bool,
    pub details: String,
    pub code: VerdictCode,
}

impl Verdict {
    pub fn new(code: VerdictCode) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            valid: code == VerdictCode::Valid,
            details: code.details().to_string(),
            code,
        }
    }

    pub fn denied(code: VerdictCode) -> Self {
        debug_assert!(code != VerdictCode::Valid);
        Self::new(code)
    }

    pub fn valid() -> Self {
        Self::new(VerdictCode::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&VerdictCode::MaximumConcurrentSeats).unwrap();
        assert_eq!(json, "\"MAXIMUM_CONCURRENT_SEATS\"");
        let json = serde_json::to_string(&VerdictCode::Valid).unwrap();
        assert_eq!(json, "\"VALID\"");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(VerdictCode::Valid.status(), StatusCode::OK);
        assert_eq!(VerdictCode::LicenseNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(VerdictCode::LicenseSuspended.status(), StatusCode::FORBIDDEN);
        assert_eq!(VerdictCode::IpLimitReached.status(), StatusCode::FORBIDDEN);
        assert_eq!(VerdictCode::BadRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            VerdictCode::InternalServerError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_verdict_valid_flag_matches_code() {
        assert!(Verdict::valid().valid);
        assert!(!Verdict::denied(VerdictCode::LicenseExpired).valid);
    }
}
