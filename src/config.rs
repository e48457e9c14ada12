pub mod error;

use error::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::{fs, path::Path};

pub const DEFAULT_CREDIT_ROUND_INTERVAL_MS: u64 = 10;
pub const DEFAULT_DESIRED_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_CREDIT: usize = 50;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SluiceConfig {
    #[serde(default)]
    pub actor_system: ActorSystemConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActorSystemConfig {
    #[serde(default)]
    pub shutdown_timeout_ms: Option<u64>,
}

/// Tuning knobs for the credit protocol.
///
/// `max_credit` is the most credit a single inbound path may hold at normal priority. Paths with a
/// higher or lower priority get a proportionally scaled maximum.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_credit_round_interval_ms")]
    pub credit_round_interval_ms: u64,
    #[serde(default = "default_desired_batch_size")]
    pub desired_batch_size: usize,
    #[serde(default = "default_max_credit")]
    pub max_credit: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            credit_round_interval_ms: DEFAULT_CREDIT_ROUND_INTERVAL_MS,
            desired_batch_size: DEFAULT_DESIRED_BATCH_SIZE,
            max_credit: DEFAULT_MAX_CREDIT,
        }
    }
}

impl SluiceConfig {
    pub fn from_toml_str(toml_str: &str) -> ConfigResult<Self> {
        let config: SluiceConfig =
            toml::from_str(toml_str).map_err(|source| ConfigError::ParseError { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let stream = &self.stream;
        if stream.desired_batch_size == 0 {
            return Err(ConfigError::ValidationError {
                reason: "stream.desired_batch_size must be greater than 0".to_string(),
            });
        }
        if stream.max_credit < stream.desired_batch_size {
            return Err(ConfigError::ValidationError {
                reason: format!(
                    "stream.max_credit ({}) must not be smaller than stream.desired_batch_size ({})",
                    stream.max_credit, stream.desired_batch_size
                ),
            });
        }
        if stream.credit_round_interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                reason: "stream.credit_round_interval_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

fn default_credit_round_interval_ms() -> u64 {
    DEFAULT_CREDIT_ROUND_INTERVAL_MS
}

fn default_desired_batch_size() -> usize {
    DEFAULT_DESIRED_BATCH_SIZE
}

fn default_max_credit() -> usize {
    DEFAULT_MAX_CREDIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SluiceConfig::default();
        assert!(config.actor_system.shutdown_timeout_ms.is_none());
        assert_eq!(config.stream.desired_batch_size, DEFAULT_DESIRED_BATCH_SIZE);
        assert_eq!(config.stream.max_credit, DEFAULT_MAX_CREDIT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[actor_system]
shutdown_timeout_ms = 1000

[stream]
credit_round_interval_ms = 5
desired_batch_size = 20
max_credit = 100
"#;
        let config = SluiceConfig::from_toml_str(toml_str).expect("Failed to parse config");
        assert_eq!(config.actor_system.shutdown_timeout_ms, Some(1000));
        assert_eq!(config.stream.credit_round_interval_ms, 5);
        assert_eq!(config.stream.desired_batch_size, 20);
        assert_eq!(config.stream.max_credit, 100);
    }

    #[test]
    fn test_partial_stream_section_uses_defaults() {
        let config = SluiceConfig::from_toml_str("[stream]\nmax_credit = 80\n")
            .expect("Failed to parse config");
        assert_eq!(config.stream.max_credit, 80);
        assert_eq!(config.stream.desired_batch_size, DEFAULT_DESIRED_BATCH_SIZE);
    }

    #[test]
    fn test_rejects_credit_below_batch_size() {
        let result = SluiceConfig::from_toml_str("[stream]\ndesired_batch_size = 20\nmax_credit = 5\n");
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = SluiceConfig::from_toml_str("[stream\n");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = SluiceConfig::load_from_file("does_not_exist_sluice.toml");
        assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
    }

    #[test]
    fn test_example_config_parses() {
        let toml_str = include_str!("../sluice.config.example.toml");
        let config = SluiceConfig::from_toml_str(toml_str).expect("Failed to parse example config");
        assert!(config.stream.desired_batch_size > 0);
    }
}
