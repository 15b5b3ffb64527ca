//! Driver configuration.
//!
//! Values are layered with `figment`: built-in defaults, then an optional
//! `sphero.toml` in the working directory, then `SPHERO_*` environment
//! variables.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SPHERO_";
/// Configuration file read from the working directory when present.
pub const CONFIG_FILE: &str = "sphero.toml";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider could not be read or a value has the wrong type.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// A value is out of range.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Tunables for one robot connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Interval of the keep-alive ping in milliseconds.
    pub ping_interval_ms: u64,
    /// Largest number of bytes written to the transport in one batch.
    pub max_batch_bytes: usize,
    /// Return an error from `connect` instead of `Ok(false)` on failure.
    pub raise_on_connect_failure: bool,
    /// Give up on responses older than this many milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Force teardown this long after a graceful disconnect began.
    pub disconnect_grace_ms: u64,
    /// Allow macros to be streamed in chunks.
    pub macro_streaming: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 60_000,
            max_batch_bytes: 256,
            raise_on_connect_failure: false,
            response_timeout_ms: None,
            disconnect_grace_ms: 5_000,
            macro_streaming: true,
        }
    }
}

impl DriverConfig {
    /// Load configuration from defaults, [`CONFIG_FILE`] and the
    /// environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a provider fails or a value is invalid.
    pub fn load() -> Result<Self, ConfigError> { Self::from_figment(&Self::figment()) }

    /// The provider stack used by [`DriverConfig::load`].
    #[must_use]
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract and validate configuration from `figment`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if extraction fails or a value is invalid.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ping_interval_ms",
                reason: "must be positive",
            });
        }
        if self.max_batch_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_batch_bytes",
                reason: "must be positive",
            });
        }
        if matches!(self.response_timeout_ms, Some(0)) {
            return Err(ConfigError::Invalid {
                field: "response_timeout_ms",
                reason: "must be positive when set",
            });
        }
        Ok(())
    }

    /// Keep-alive interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration { Duration::from_millis(self.ping_interval_ms) }

    /// Response timeout, if enabled.
    #[must_use]
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    /// Graceful disconnect deadline.
    #[must_use]
    pub const fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

#[cfg(test)]
#[expect(clippy::expect_used, reason = "test assertions")]
mod tests {
    use figment::Jail;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_apply_without_sources() {
        Jail::expect_with(|_j| {
            let cfg = DriverConfig::load().expect("load");
            assert_eq!(cfg, DriverConfig::default());
            Ok(())
        });
    }

    #[rstest]
    fn env_overrides_file() {
        Jail::expect_with(|j| {
            j.create_file(CONFIG_FILE, "max_batch_bytes = 64\nping_interval_ms = 1000")?;
            j.set_env("SPHERO_PING_INTERVAL_MS", "2500");
            let cfg = DriverConfig::load().expect("load");
            assert_eq!(cfg.max_batch_bytes, 64);
            assert_eq!(cfg.ping_interval(), Duration::from_millis(2500));
            Ok(())
        });
    }

    #[rstest]
    fn optional_timeout_loads_from_env() {
        Jail::expect_with(|j| {
            j.set_env("SPHERO_RESPONSE_TIMEOUT_MS", "750");
            let cfg = DriverConfig::load().expect("load");
            assert_eq!(cfg.response_timeout(), Some(Duration::from_millis(750)));
            Ok(())
        });
    }

    #[rstest]
    #[case("SPHERO_PING_INTERVAL_MS", "0", "ping_interval_ms")]
    #[case("SPHERO_MAX_BATCH_BYTES", "0", "max_batch_bytes")]
    #[case("SPHERO_RESPONSE_TIMEOUT_MS", "0", "response_timeout_ms")]
    fn rejects_zero_values(#[case] var: &str, #[case] value: &str, #[case] field: &str) {
        Jail::expect_with(|j| {
            j.set_env(var, value);
            let err = DriverConfig::load().expect_err("invalid");
            assert!(
                matches!(err, ConfigError::Invalid { field: f, .. } if f == field),
                "unexpected error: {err}"
            );
            Ok(())
        });
    }

    #[rstest]
    fn malformed_value_is_a_load_error() {
        Jail::expect_with(|j| {
            j.set_env("SPHERO_MACRO_STREAMING", "sometimes");
            assert!(matches!(DriverConfig::load(), Err(ConfigError::Load(_))));
            Ok(())
        });
    }
}
