//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Largest initial request ceiling `speed * requests_per_speed` may produce.
pub const MAX_REQUEST_CEILING: f64 = 10_000.0;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for out-of-range values and
    /// `ConfigError::Missing` when only half of the login credentials is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.wiki_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            _ => {
                return Err(ConfigError::Invalid {
                    field: "wiki_url".into(),
                    reason: "must be an absolute http(s) URL".into(),
                });
            }
        }

        if !(self.speed > 0.0) {
            return Err(ConfigError::Invalid { field: "speed".into(), reason: "must be greater than 0".into() });
        }
        if self.requests_per_speed == 0 {
            return Err(ConfigError::Invalid {
                field: "requests_per_speed".into(),
                reason: "must be at least 1".into(),
            });
        }
        let ceiling = self.speed * self.requests_per_speed as f64;
        if !ceiling.is_finite() || ceiling > MAX_REQUEST_CEILING {
            return Err(ConfigError::Invalid {
                field: "speed".into(),
                reason: format!("speed * requests_per_speed must not exceed {MAX_REQUEST_CEILING}"),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.max_retries > 20 {
            return Err(ConfigError::Invalid { field: "max_retries".into(), reason: "must not exceed 20".into() });
        }
        if !(0.0..=1.0).contains(&self.retry_randomisation) {
            return Err(ConfigError::Invalid {
                field: "retry_randomisation".into(),
                reason: "must be between 0 and 1".into(),
            });
        }

        if self.scan_workers == 0 {
            return Err(ConfigError::Invalid { field: "scan_workers".into(), reason: "must be at least 1".into() });
        }
        if self.scan_batch_size == 0 {
            return Err(ConfigError::Invalid { field: "scan_batch_size".into(), reason: "must be at least 1".into() });
        }

        match (&self.username, &self.password) {
            (Some(_), None) => {
                return Err(ConfigError::Missing {
                    field: "password".into(),
                    hint: "Set WIKIFETCH_PASSWORD alongside WIKIFETCH_USERNAME".into(),
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing {
                    field: "username".into(),
                    hint: "Set WIKIFETCH_USERNAME alongside WIKIFETCH_PASSWORD".into(),
                });
            }
            _ => {}
        }

        if !self.local_fallback && (self.local_mobile_url.is_some() || self.local_legacy_url.is_some()) {
            tracing::warn!("local service URLs are set but local_fallback is disabled; they will be ignored");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_wiki_url() {
        let config = AppConfig { wiki_url: "ftp://wiki.example".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "wiki_url"));
    }

    #[test]
    fn test_validate_speed_zero() {
        let config = AppConfig { speed: 0.0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "speed"));
    }

    #[test]
    fn test_validate_speed_too_large() {
        let config = AppConfig { speed: 1e30, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "speed"));

        let config = AppConfig { speed: f64::INFINITY, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ceiling_at_limit() {
        let config = AppConfig { speed: 1000.0, requests_per_speed: 10, ..Default::default() };
        assert!(config.validate().is_ok());
        assert_eq!(config.request_ceiling(), 10_000);

        let config = AppConfig { speed: 1000.0, requests_per_speed: 11, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_zero_workers() {
        let config = AppConfig { scan_workers: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "scan_workers"));
    }

    #[test]
    fn test_validate_half_credentials() {
        let config = AppConfig { username: Some("bot".into()), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "password"));
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { timeout_ms: 100, max_retries: 0, retry_randomisation: 0.0, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
