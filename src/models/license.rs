use serde::{Deserialize, Serialize};

/// How a license expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpirationType {
    /// Never expires
    None,
    /// Expires at a fixed date set at issuance
    Date,
    /// Expires a number of days after the expiration start point
    Duration,
}

impl ExpirationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationType::None => "none",
            ExpirationType::Date => "date",
            ExpirationType::Duration => "duration",
        }
    }
}

impl std::str::FromStr for ExpirationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ExpirationType::None),
            "date" => Ok(ExpirationType::Date),
            "duration" => Ok(ExpirationType::Duration),
            other => Err(format!("unknown expiration type: {}", other)),
        }
    }
}

/// Where the DURATION countdown starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpirationStart {
    /// Days counted from license creation
    Creation,
    /// Days counted from the first successful validation
    Activation,
}

impl ExpirationStart {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationStart::Creation => "creation",
            ExpirationStart::Activation => "activation",
        }
    }
}

impl std::str::FromStr for ExpirationStart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creation" => Ok(ExpirationStart::Creation),
            "activation" => Ok(ExpirationStart::Activation),
            other => Err(format!("unknown expiration start: {}", other)),
        }
    }
}

/// A stored license.
///
/// The plaintext key is never persisted: `license_key` holds the encrypted
/// key material and `license_key_lookup` the deterministic HMAC used as the
/// `(team_id, lookup)` unique index.
///
/// For DURATION licenses `expiration_date` stays None until the first
/// successful validation fixes it (write-once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub team_id: String,
    #[serde(skip_serializing)]
    pub license_key: Vec<u8>,
    pub license_key_lookup: String,
    pub suspended: bool,
    pub expiration_type: ExpirationType,
    pub expiration_start: ExpirationStart,
    pub expiration_days: Option<i64>,
    pub expiration_date: Option<i64>,
    pub ip_limit: Option<i64>,
    pub seats: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateLicense {
    pub license_key: String,
    #[serde(default)]
    pub customer_ids: Vec<String>,
    #[serde(default)]
    pub product_ids: Vec<String>,
    pub expiration_type: ExpirationType,
    #[serde(default)]
    pub expiration_start: Option<ExpirationStart>,
    #[serde(default)]
    pub expiration_days: Option<i64>,
    #[serde(default)]
    pub expiration_date: Option<i64>,
    #[serde(default)]
    pub ip_limit: Option<i64>,
    #[serde(default)]
    pub seats: Option<i64>,
    #[serde(default)]
    pub suspended: bool,
}

/// Issuance response payload. The only place the plaintext key ever appears
/// after creation; it is not retrievable from storage afterwards.
#[derive(Debug, Serialize)]
pub struct IssuedLicense {
    #[serde(flatten)]
    pub license: License,
    pub license_key_plain: String,
}
