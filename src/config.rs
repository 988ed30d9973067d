//! System configuration
//!
//! Read-only tuning knobs supplied by the environment. Loaded once at
//! startup and shared across services.

use std::env;

#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Unreconciled-balance ceiling above which an agent is locked (₦)
    pub circuit_breaker_limit: i64,
    /// OTP time-to-live in minutes
    pub otp_expiry_minutes: i64,
    /// Number of digits in a generated OTP
    pub otp_length: usize,
    /// Whether deposits must carry a GPS fix
    pub gps_required: bool,
    /// Background sync retry interval in minutes
    pub sync_retry_interval_minutes: u64,
    /// Oldest offline capture the sync worker will accept without a warning
    pub max_offline_hours: i64,
    /// Sync attempts before a queue entry is marked FAILED
    pub sync_max_retries: u32,
}

impl SystemConfig {
    /// Load configuration from environment variables, falling back to
    /// production defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            circuit_breaker_limit: env_parse("CIRCUIT_BREAKER_LIMIT", 10_000),
            otp_expiry_minutes: env_parse("OTP_EXPIRY_MINUTES", 10),
            otp_length: env_parse("OTP_LENGTH", 6),
            gps_required: env::var("GPS_REQUIRED")
                .map(|v| v == "true")
                .unwrap_or(true),
            sync_retry_interval_minutes: env_parse("SYNC_RETRY_INTERVAL_MINUTES", 15),
            max_offline_hours: env_parse("MAX_OFFLINE_HOURS", 72),
            sync_max_retries: env_parse("SYNC_MAX_RETRIES", 10),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_limit: 10_000,
            otp_expiry_minutes: 10,
            otp_length: 6,
            gps_required: true,
            sync_retry_interval_minutes: 15,
            max_offline_hours: 72,
            sync_max_retries: 10,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
