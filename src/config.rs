//! Process-wide configuration, read once at startup
//!
//! Mirrors the three environment variables in the spec's external
//! interfaces section and the `ResourceLimits` thresholds. `Config::from_env`
//! is the only place environment variables are consulted; every other
//! module takes its configuration as explicit arguments.

use std::env;
use std::time::Duration;

/// Network timeouts and retry policy read from the environment once.
#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub total_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_multiplier: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(900),
            max_retries: 5,
            retry_backoff_multiplier: 2.0,
        }
    }
}

impl NetworkConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = env::var("DATAFINANCE_NETWORK_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(secs) => cfg.total_timeout = Duration::from_secs(secs),
                Err(e) => tracing::warn!(
                    "DATAFINANCE_NETWORK_TIMEOUT={val:?} is not a valid integer ({e}); using default"
                ),
            }
        }

        if let Ok(val) = env::var("DATAFINANCE_NETWORK_MAX_RETRIES") {
            match val.parse::<u32>() {
                Ok(n) => cfg.max_retries = n,
                Err(e) => tracing::warn!(
                    "DATAFINANCE_NETWORK_MAX_RETRIES={val:?} is not a valid integer ({e}); using default"
                ),
            }
        }

        if let Ok(val) = env::var("DATAFINANCE_NETWORK_RETRY_BACKOFF") {
            match val.parse::<f64>() {
                Ok(m) => cfg.retry_backoff_multiplier = m,
                Err(e) => tracing::warn!(
                    "DATAFINANCE_NETWORK_RETRY_BACKOFF={val:?} is not a valid float ({e}); using default"
                ),
            }
        }

        cfg
    }
}

/// Thresholds consulted by the Resource Monitor (§3 ResourceLimits).
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub memory_warning_threshold: f32,
    pub memory_critical_threshold: f32,
    pub memory_exhausted_threshold: f32,
    pub cpu_warning_threshold: f32,
    pub cpu_critical_threshold: f32,
    pub min_free_memory_mb: u64,
    pub auto_gc_on_warning: bool,
    pub circuit_breaker_cooldown_seconds: u64,
    pub circuit_breaker_enabled: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_warning_threshold: 70.0,
            memory_critical_threshold: 85.0,
            memory_exhausted_threshold: 95.0,
            cpu_warning_threshold: 80.0,
            cpu_critical_threshold: 90.0,
            min_free_memory_mb: 100,
            auto_gc_on_warning: true,
            circuit_breaker_cooldown_seconds: 10,
            circuit_breaker_enabled: true,
        }
    }
}
