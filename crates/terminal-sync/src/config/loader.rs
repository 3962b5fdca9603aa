use std::path::Path;
use thiserror::Error;

use super::types::MirrorConfigFile;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Load mirror configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MirrorConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<MirrorConfigFile, ConfigError> {
    let config: MirrorConfigFile = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<MirrorConfigFile, ConfigError> {
    let default_config = include_str!("default_config.json");
    load_config_from_str(default_config)
}

impl MirrorConfigFile {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let throttler = &self.synchronization_throttler;
        if throttler.max_concurrent_synchronizations == 0
            || throttler.global_max_concurrent_synchronizations == 0
        {
            return Err(ConfigError::Invalid(
                "concurrent synchronization limits must be positive".to_string(),
            ));
        }
        if throttler.queue_timeout_secs == 0 || throttler.synchronization_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "throttler timeouts must be positive".to_string(),
            ));
        }
        if self.packet_ordering.wait_list_size_limit == 0 {
            return Err(ConfigError::Invalid(
                "wait_list_size_limit must be positive".to_string(),
            ));
        }
        if self.packet_ordering.sweep_interval_ms == 0 || throttler.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweep intervals must be positive".to_string(),
            ));
        }
        let subscription = &self.subscription;
        if subscription.initial_retry_interval_secs == 0
            || subscription.max_retry_interval_secs < subscription.initial_retry_interval_secs
        {
            return Err(ConfigError::Invalid(
                "retry interval range is empty".to_string(),
            ));
        }
        if subscription.disconnect_jitter_max_secs < subscription.disconnect_jitter_min_secs {
            return Err(ConfigError::Invalid(
                "disconnect jitter range is inverted".to_string(),
            ));
        }
        for account in &self.connection.accounts {
            if account.account_id.is_empty() {
                return Err(ConfigError::Invalid("empty account_id".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_default_config() {
        let config = load_default_config().unwrap();
        assert_eq!(config.connection.accounts.len(), 1);
        assert_eq!(config.connection.accounts[0].account_id, "demo-account");
    }

    #[test]
    fn test_rejects_inverted_jitter() {
        let json = r#"{
            "subscription": {
                "disconnect_jitter_min_secs": 5,
                "disconnect_jitter_max_secs": 1
            }
        }"#;

        let result = load_config_from_str(json);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_limit() {
        let json = r#"{ "synchronization_throttler": { "max_concurrent_synchronizations": 0 } }"#;
        assert!(load_config_from_str(json).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/mirror.json");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
