//! Coordinator configuration
//!
//! Loaded from TOML; every key is optional.
//!
//! ```toml
//! refresh_interval_ms = 1000
//! diagnostic_interval_ms = 10000
//!
//! [finalize]
//! max_attempts = 3
//! retry_backoff_ms = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Retry policy for finalizing collection after the provider confirms the end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    /// Attempts before giving up and waiting for a manual retry
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt
    pub retry_backoff_ms: u64,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl FinalizeConfig {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Timing and retry settings for a [`WorkoutSessionCoordinator`](crate::WorkoutSessionCoordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Period of the snapshot refresh pushed to the presence notifier
    pub refresh_interval_ms: u64,
    /// Period of the diagnostic snapshot dump
    pub diagnostic_interval_ms: u64,
    pub finalize: FinalizeConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1_000,
            diagnostic_interval_ms: 10_000,
            finalize: FinalizeConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: CoordinatorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "refresh_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.diagnostic_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "diagnostic_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.finalize.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "finalize.max_attempts",
                message: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn diagnostic_interval(&self) -> Duration {
        Duration::from_millis(self.diagnostic_interval_ms)
    }
}
