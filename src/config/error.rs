use std::fmt;
use std::io;

/// Errors raised while loading a [`SluiceConfig`](super::SluiceConfig).
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    FileReadError { path: String, source: io::Error },
    /// The file is not valid TOML or does not match the config layout
    ParseError { source: toml::de::Error },
    /// The values parsed but violate a constraint of the credit protocol
    ValidationError { reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileReadError { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path, source)
            }
            ConfigError::ParseError { source } => write!(f, "Failed to parse config: {}", source),
            ConfigError::ValidationError { reason } => write!(f, "Invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileReadError { source, .. } => Some(source),
            ConfigError::ParseError { source } => Some(source),
            ConfigError::ValidationError { .. } => None,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_validation_error_display() {
        let err = ConfigError::ValidationError {
            reason: "max_credit too small".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid config: max_credit too small");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_file_read_error_keeps_source() {
        let err = ConfigError::FileReadError {
            path: "missing.toml".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("missing.toml"));
        assert!(err.source().is_some());
    }
}
