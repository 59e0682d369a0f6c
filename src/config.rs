//! Engine-wide configuration.
//!
//! Resolution order: defaults → TOML text or file → `RATE_GUARD_*` environment
//! variables → validation.
//!
//! ```toml
//! max_sleep_threads = 20
//! max_shaping_retries = 16
//! max_shaping_delay_ms = 5000
//! counter_ttl_secs = 600
//! cleaner_period_secs = 180
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings shared by every counter of one [`AdmissionEngine`](crate::AdmissionEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Node-wide cap on requests sleeping in the shaper at once.
    pub max_sleep_threads: usize,
    /// Shaping sleeps one request may go through before giving up.
    pub max_shaping_retries: u32,
    /// Total time one request may spend sleeping in the shaper.
    pub max_shaping_delay_ms: u64,
    /// Idle counters older than this are evicted by the sweeper.
    pub counter_ttl_secs: u64,
    /// How often the sweeper runs.
    pub cleaner_period_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sleep_threads: 20,
            max_shaping_retries: 16,
            max_shaping_delay_ms: 5_000,
            counter_ttl_secs: 600,
            cleaner_period_secs: 180,
        }
    }
}

impl EngineConfig {
    /// Parses TOML, applies environment overrides and validates.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: EngineConfig = toml::from_str(text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file, or the defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let mut config = EngineConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.counter_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "counter_ttl_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.cleaner_period_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cleaner_period_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn max_shaping_delay(&self) -> Duration {
        Duration::from_millis(self.max_shaping_delay_ms)
    }

    pub fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.counter_ttl_secs)
    }

    pub fn cleaner_period(&self) -> Duration {
        Duration::from_secs(self.cleaner_period_secs)
    }

    /// Apply RATE_GUARD_* env var overrides.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("RATE_GUARD_MAX_SLEEP_THREADS") {
            self.max_sleep_threads = parse_override("max_sleep_threads", &v)?;
        }
        if let Some(v) = lookup("RATE_GUARD_MAX_SHAPING_RETRIES") {
            self.max_shaping_retries = parse_override("max_shaping_retries", &v)?;
        }
        if let Some(v) = lookup("RATE_GUARD_MAX_SHAPING_DELAY_MS") {
            self.max_shaping_delay_ms = parse_override("max_shaping_delay_ms", &v)?;
        }
        if let Some(v) = lookup("RATE_GUARD_COUNTER_TTL_SECS") {
            self.counter_ttl_secs = parse_override("counter_ttl_secs", &v)?;
        }
        if let Some(v) = lookup("RATE_GUARD_CLEANER_PERIOD_SECS") {
            self.cleaner_period_secs = parse_override("cleaner_period_secs", &v)?;
        }
        Ok(())
    }
}

fn parse_override<T>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        field,
        reason: format!("{value:?}: {e}"),
    })
}
