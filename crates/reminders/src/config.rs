//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use mealnudge_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the reconciliation engine.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// default_timezone = "Europe/Berlin"
/// alarm_timeout_ms = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound for a single preference store call.
    pub store_timeout_ms: u64,
    /// Upper bound for a single alarm port call.
    pub alarm_timeout_ms: u64,
    /// Upper bound for draining the engine on sign-out.
    pub sign_out_timeout_ms: u64,
    /// Attempts to persist the fired marker of a one-shot reminder.
    pub mark_fired_max_attempts: u32,
    /// Re-run passes after transient alarm failures.
    pub reconcile_retry_attempts: u32,
    /// Base backoff between retries.
    pub retry_base_backoff_ms: u64,
    /// Backoff ceiling.
    pub retry_max_backoff_ms: u64,
    /// Retry once with an inexact alarm when exact registration fails.
    pub allow_inexact_fallback: bool,
    /// IANA zone used until the platform reports one.
    pub default_timezone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 10_000,
            alarm_timeout_ms: 5_000,
            sign_out_timeout_ms: 30_000,
            mark_fired_max_attempts: 5,
            reconcile_retry_attempts: 3,
            retry_base_backoff_ms: 500,
            retry_max_backoff_ms: 60_000,
            allow_inexact_fallback: true,
            default_timezone: "UTC".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` on malformed TOML or invalid values.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::FileReadFailed` if the file cannot be read and
    /// `Error::InvalidConfig` if its content is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    /// Check value ranges and the timezone name.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.store_timeout_ms == 0 || self.alarm_timeout_ms == 0 || self.sign_out_timeout_ms == 0
        {
            return Err(Error::invalid_config("timeouts must be greater than zero"));
        }
        if self.mark_fired_max_attempts == 0 {
            return Err(Error::invalid_config(
                "mark_fired_max_attempts must be at least 1",
            ));
        }
        if self.retry_base_backoff_ms > self.retry_max_backoff_ms {
            return Err(Error::invalid_config(format!(
                "retry_base_backoff_ms ({}) exceeds retry_max_backoff_ms ({})",
                self.retry_base_backoff_ms, self.retry_max_backoff_ms
            )));
        }
        self.timezone()
            .map(|_| ())
            .map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// The configured default zone.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTimezone` for an unknown IANA name.
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.default_timezone)
    }

    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub const fn alarm_timeout(&self) -> Duration {
        Duration::from_millis(self.alarm_timeout_ms)
    }

    pub const fn sign_out_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_out_timeout_ms)
    }

    /// Set the store timeout.
    #[must_use]
    pub const fn with_store_timeout_ms(mut self, ms: u64) -> Self {
        self.store_timeout_ms = ms;
        self
    }

    /// Set the alarm timeout.
    #[must_use]
    pub const fn with_alarm_timeout_ms(mut self, ms: u64) -> Self {
        self.alarm_timeout_ms = ms;
        self
    }

    /// Set retry backoff bounds.
    #[must_use]
    pub const fn with_backoff_ms(mut self, base: u64, max: u64) -> Self {
        self.retry_base_backoff_ms = base;
        self.retry_max_backoff_ms = max;
        self
    }

    /// Enable/disable the inexact fallback.
    #[must_use]
    pub const fn with_inexact_fallback(mut self, enabled: bool) -> Self {
        self.allow_inexact_fallback = enabled;
        self
    }

    /// Set the default timezone name.
    #[must_use]
    pub fn with_timezone(mut self, name: impl Into<String>) -> Self {
        self.default_timezone = name.into();
        self
    }
}

/// Parse an IANA timezone name.
///
/// # Errors
///
/// Returns `Error::InvalidTimezone` for an unknown name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::invalid_timezone(name))
}
