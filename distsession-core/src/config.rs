//! Session store configuration

use crate::error::{DistSessionError, DistSessionResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Minimum identifier length the embedding framework accepts. The framework
/// treats it as an exclusive bound, so generated identifiers must be longer.
pub const DEFAULT_SESSION_ID_MIN_LENGTH: usize = 32;

pub const DEFAULT_DEPLOYMENT_NAME: &str = "DistributableSessionStore";

/// How session attributes are persisted by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionPersistenceGranularity {
    /// All attributes stored as a single entry
    Session,
    /// One entry per attribute, only mutated attributes are rewritten
    Attribute,
}

/// Attribute marshaller selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionAttributeMarshaller {
    Tagged,
    Json,
}

/// Options consumed by the session store at `init`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionStoreConfig {
    pub deployment_name: String,
    pub granularity: SessionPersistenceGranularity,
    pub marshaller: SessionAttributeMarshaller,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_active_sessions: Option<usize>,
    #[serde(rename = "idleTimeout", skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    /// Identifier length in hex characters
    #[serde(rename = "sessionIdentifierLength", alias = "sessionIdLength")]
    pub session_id_length: usize,
    #[serde(rename = "sessionTimeout")]
    pub default_session_timeout_ms: u64,
    /// Upper bound on how long `close` waits for in-flight operations
    #[serde(rename = "closeTimeout")]
    pub close_timeout_ms: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            deployment_name: DEFAULT_DEPLOYMENT_NAME.to_string(),
            granularity: SessionPersistenceGranularity::Attribute,
            marshaller: SessionAttributeMarshaller::Tagged,
            max_active_sessions: None,
            idle_timeout_ms: None,
            session_id_length: DEFAULT_SESSION_ID_MIN_LENGTH + 2,
            default_session_timeout_ms: 1_800_000,
            close_timeout_ms: 10_000,
        }
    }
}

impl SessionStoreConfig {
    /// Build from the options object handed to `init`. A null object yields defaults.
    pub fn from_options(options: &serde_json::Value) -> DistSessionResult<Self> {
        if options.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(options.clone()).map_err(|e| DistSessionError::Config {
            message: format!("Invalid session store options: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("parse_options")
                .with_suggestion("Check option names and value types"),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> DistSessionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DistSessionError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: SessionStoreConfig =
            toml::from_str(&content).map_err(|e| DistSessionError::Config {
                message: format!("Failed to parse config: {}", e),
                source: Some(Box::new(e)),
                context: crate::ErrorContext::new("config")
                    .with_operation("parse_toml")
                    .with_suggestion("Check TOML syntax in config file"),
            })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> DistSessionResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| DistSessionError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| DistSessionError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: crate::ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    pub fn validate(&self) -> DistSessionResult<()> {
        if self.deployment_name.trim().is_empty() {
            return Err(invalid(
                "Deployment name must not be empty",
                "Set deploymentName",
            ));
        }

        if self.session_id_length <= DEFAULT_SESSION_ID_MIN_LENGTH {
            return Err(invalid(
                &format!(
                    "Session identifier length {} must exceed {}",
                    self.session_id_length, DEFAULT_SESSION_ID_MIN_LENGTH
                ),
                "Increase sessionIdentifierLength",
            ));
        }

        if self.max_active_sessions == Some(0) {
            return Err(invalid(
                "maxActiveSessions must be greater than 0",
                "Remove maxActiveSessions to disable the limit",
            ));
        }

        if self.close_timeout_ms == 0 {
            return Err(invalid(
                "closeTimeout must be greater than 0",
                "Set closeTimeout to a positive value",
            ));
        }

        Ok(())
    }

    pub fn default_session_timeout(&self) -> Duration {
        Duration::from_millis(self.default_session_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

fn invalid(message: &str, suggestion: &str) -> DistSessionError {
    DistSessionError::Config {
        message: message.to_string(),
        source: None,
        context: crate::ErrorContext::new("config")
            .with_operation("validate")
            .with_suggestion(suggestion),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionStoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session_id_length, 34);
        assert_eq!(config.granularity, SessionPersistenceGranularity::Attribute);
    }

    #[test]
    fn test_from_options_uses_framework_keys() {
        let config = SessionStoreConfig::from_options(&json!({
            "deploymentName": "shop",
            "granularity": "SESSION",
            "marshaller": "JSON",
            "maxActiveSessions": 100,
            "idleTimeout": 60000,
            "sessionIdentifierLength": 40,
        }))
        .unwrap();

        assert_eq!(config.deployment_name, "shop");
        assert_eq!(config.granularity, SessionPersistenceGranularity::Session);
        assert_eq!(config.marshaller, SessionAttributeMarshaller::Json);
        assert_eq!(config.max_active_sessions, Some(100));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.session_id_length, 40);
        assert_eq!(config.close_timeout_ms, 10_000);
    }

    #[test]
    fn test_null_options_yield_defaults() {
        let config = SessionStoreConfig::from_options(&serde_json::Value::Null).unwrap();
        assert_eq!(config, SessionStoreConfig::default());
    }

    #[test]
    fn test_invalid_granularity_rejected() {
        let result = SessionStoreConfig::from_options(&json!({ "granularity": "ROW" }));
        assert!(matches!(result, Err(DistSessionError::Config { .. })));
    }

    #[test]
    fn test_validation_rejects_minimum_length() {
        let config = SessionStoreConfig {
            session_id_length: DEFAULT_SESSION_ID_MIN_LENGTH,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionStoreConfig {
            max_active_sessions: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionStoreConfig {
            close_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionStoreConfig {
            deployment_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
