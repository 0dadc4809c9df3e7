//! Reorder engine configuration.
//!
//! Configuration can be built in code or loaded from JSON. Every JSON field is
//! optional and falls back to its default:
//!
//! ```json
//! {
//!   "reorder_age_timeout_ms": 100,
//!   "out_of_range_teardown": true,
//!   "max_sessions": 8
//! }
//! ```

use crate::pool::DEFAULT_MAX_SESSIONS;
use crate::reorder::MAX_BA_BUFFER_SIZE;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Default aging timeout.
pub const DEFAULT_REORDER_AGE_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on the session pool size.
pub const MAX_SESSIONS_LIMIT: usize = MAX_BA_BUFFER_SIZE as usize;

/// Reorder engine tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderConfig {
    /// How long a hole may hold back buffered frames before it is skipped.
    pub reorder_age_timeout: Duration,
    /// Ask the control plane to tear down sessions that receive frames far
    /// behind the window.
    pub out_of_range_teardown: bool,
    /// Number of receive sessions the device can hold at once.
    pub max_sessions: usize,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            reorder_age_timeout: DEFAULT_REORDER_AGE_TIMEOUT,
            out_of_range_teardown: true,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// On-disk form of [`ReorderConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    reorder_age_timeout_ms: Option<u64>,
    out_of_range_teardown: Option<bool>,
    max_sessions: Option<usize>,
}

impl ReorderConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reorder_age_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "reorder_age_timeout must be greater than 0",
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_sessions must be greater than 0",
            ));
        }
        if self.max_sessions > MAX_SESSIONS_LIMIT {
            return Err(ConfigError::InvalidConfig("max_sessions must be <= 64"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let defaults = Self::default();
        let config = Self {
            reorder_age_timeout: file
                .reorder_age_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reorder_age_timeout),
            out_of_range_teardown: file
                .out_of_range_teardown
                .unwrap_or(defaults.out_of_range_teardown),
            max_sessions: file.max_sessions.unwrap_or(defaults.max_sessions),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A parameter is out of range.
    InvalidConfig(&'static str),
    /// The JSON could not be parsed.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid reorder config: {}", msg),
            Self::Parse(msg) => write!(f, "failed to parse reorder config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use ba_reorder_macros::ba_test;

    #[ba_test]
    fn test_default_config() {
        let config = ReorderConfig::default();
        assert_eq!(config.reorder_age_timeout, Duration::from_millis(100));
        assert!(config.out_of_range_teardown);
        assert_eq!(config.max_sessions, 8);
        assert!(config.validate().is_ok());
    }

    #[ba_test]
    fn test_validate_rejects_zero_timeout() {
        let config = ReorderConfig {
            reorder_age_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[ba_test]
    fn test_validate_session_bounds() {
        let zero = ReorderConfig {
            max_sessions: 0,
            ..Default::default()
        };
        let too_many = ReorderConfig {
            max_sessions: 65,
            ..Default::default()
        };
        let most = ReorderConfig {
            max_sessions: 64,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        assert!(too_many.validate().is_err());
        assert!(most.validate().is_ok());
    }

    #[ba_test]
    fn test_from_json_partial() {
        let config = ReorderConfig::from_json(r#"{"reorder_age_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.reorder_age_timeout, Duration::from_millis(250));
        assert!(config.out_of_range_teardown);
        assert_eq!(config.max_sessions, 8);
    }

    #[ba_test]
    fn test_from_json_full() {
        let config = ReorderConfig::from_json(
            r#"{"reorder_age_timeout_ms": 20, "out_of_range_teardown": false, "max_sessions": 16}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            ReorderConfig {
                reorder_age_timeout: Duration::from_millis(20),
                out_of_range_teardown: false,
                max_sessions: 16,
            }
        );
    }

    #[ba_test]
    fn test_from_json_empty_object_is_default() {
        assert_eq!(
            ReorderConfig::from_json("{}").unwrap(),
            ReorderConfig::default()
        );
    }

    #[ba_test]
    fn test_from_json_errors() {
        assert!(matches!(
            ReorderConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ReorderConfig::from_json(r#"{"max_sessoins": 4}"#),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            ReorderConfig::from_json(r#"{"reorder_age_timeout_ms": 0}"#),
            Err(ConfigError::InvalidConfig(
                "reorder_age_timeout must be greater than 0"
            ))
        );
    }
}
