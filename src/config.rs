use std::env;

use crate::crypto::MasterKey;

#[derive(Debug, Clone)]
pub struct RateLimits {
    pub standard_rpm: u32,
    pub strict_rpm: u32,
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub master_key: MasterKey,
    /// Bearer token guarding the issuance API. Optional in dev mode.
    pub service_api_key: Option<String>,
    pub rate_limits: RateLimits,
    /// Overall per-request timeout in seconds; on timeout the caller must
    /// treat the attempt as denied (fail-closed)
    pub request_timeout_secs: u64,
    /// Request logs older than this are pruned by the background task
    /// (0 = never prune)
    pub log_retention_days: i64,
    pub dev_mode: bool,
}

/// Load a master key from a file containing a base64-encoded 32-byte key.
pub fn load_master_key_from_file(path: &str) -> Result<MasterKey, String> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path, e))?;
    MasterKey::from_base64(&contents).map_err(|e| format!("Invalid key in {}: {}", path, e))
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("KEYGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let master_key = if let Ok(path) = env::var("KEYGATE_MASTER_KEY_FILE") {
            load_master_key_from_file(&path).unwrap_or_else(|e| {
                panic!("Failed to load master key: {}", e);
            })
        } else if let Ok(encoded) = env::var("KEYGATE_MASTER_KEY") {
            MasterKey::from_base64(&encoded).unwrap_or_else(|e| {
                panic!("Invalid KEYGATE_MASTER_KEY: {}", e);
            })
        } else if dev_mode {
            tracing::warn!("No master key configured; generating an ephemeral dev key");
            MasterKey::from_base64(&MasterKey::generate()).expect("generated key is valid")
        } else {
            panic!("KEYGATE_MASTER_KEY or KEYGATE_MASTER_KEY_FILE must be set outside dev mode");
        };

        let service_api_key = env::var("KEYGATE_SERVICE_API_KEY").ok();
        if service_api_key.is_none() && !dev_mode {
            tracing::warn!("KEYGATE_SERVICE_API_KEY not set; issuance API is disabled");
        }

        let rate_limits = RateLimits {
            standard_rpm: env::var("RATE_LIMIT_STANDARD_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            strict_rpm: env::var("RATE_LIMIT_STRICT_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "keygate.db".to_string()),
            master_key,
            service_api_key,
            rate_limits,
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            log_retention_days: env::var("LOG_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(365),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
