use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    /// Encrypted Stripe webhook signing secret (None = Stripe not configured)
    #[serde(skip_serializing)]
    pub stripe_webhook_secret: Option<Vec<u8>>,
    /// Encrypted Polymart webhook signing secret
    #[serde(skip_serializing)]
    pub polymart_webhook_secret: Option<Vec<u8>>,
}

/// Lookback window for distinct-IP counting against a license's IP limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpLimitPeriod {
    Day,
    Week,
    Month,
}

impl IpLimitPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpLimitPeriod::Day => "day",
            IpLimitPeriod::Week => "week",
            IpLimitPeriod::Month => "month",
        }
    }

    /// Window length in seconds. A month is 30 days.
    pub fn lookback_secs(&self) -> i64 {
        match self {
            IpLimitPeriod::Day => 86_400,
            IpLimitPeriod::Week => 7 * 86_400,
            IpLimitPeriod::Month => 30 * 86_400,
        }
    }
}

impl std::str::FromStr for IpLimitPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(IpLimitPeriod::Day),
            "week" => Ok(IpLimitPeriod::Week),
            "month" => Ok(IpLimitPeriod::Month),
            other => Err(format!("unknown ip limit period: {}", other)),
        }
    }
}

/// Per-team settings gating the validation pipeline.
///
/// Consumed read-only by the core. Defaults are resolved here, once, at the
/// settings-loading boundary; the validation logic never falls back field by
/// field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSettings {
    /// Require an explicit customer match whenever a license has customers bound
    pub strict_customers: bool,
    /// Require an explicit product match whenever a license has products bound
    pub strict_products: bool,
    /// Minutes of inactivity before a heartbeat no longer counts as an active seat
    pub heartbeat_timeout_minutes: i64,
    /// Lookback window for distinct-IP counting
    pub ip_limit_period: IpLimitPeriod,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            strict_customers: false,
            strict_products: false,
            heartbeat_timeout_minutes: 60,
            ip_limit_period: IpLimitPeriod::Month,
        }
    }
}

/// Team-scoped Ed25519 key pair. The private key is stored envelope-encrypted
/// under the master key and only ever decrypted to sign a challenge.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub team_id: String,
    pub private_key: Vec<u8>,
    pub public_key: String,
    pub created_at: i64,
}
