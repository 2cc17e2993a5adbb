use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestType {
    Verify,
    Download,
    Heartbeat,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Verify => "verify",
            RequestType::Download => "download",
            RequestType::Heartbeat => "heartbeat",
        }
    }
}

impl std::str::FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify" => Ok(RequestType::Verify),
            "download" => Ok(RequestType::Download),
            "heartbeat" => Ok(RequestType::Heartbeat),
            other => Err(format!("unknown request type: {}", other)),
        }
    }
}

/// Append-only record of a validation attempt.
///
/// Doubles as the source of truth for distinct-IP counting against a
/// license's IP limit. The validation path never mutates or deletes rows;
/// retention is a background concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: String,
    pub team_id: String,
    pub license_id: Option<String>,
    pub ip_address: String,
    pub request_type: RequestType,
    /// Verdict code string, e.g. "VALID" or "LICENSE_EXPIRED"
    pub status: String,
    pub status_code: i64,
    pub created_at: i64,
}
