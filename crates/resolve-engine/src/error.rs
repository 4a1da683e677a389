//! Engine-level errors
//!
//! Token-level failures never surface here; they land in
//! `ProcessResult::errors`.

use resolve_core::{GrammarError, PolicyError};
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Placeholder grammar failed to build
    #[error("grammar error: {0}")]
    Grammar(#[from] GrammarError),

    /// Caller-supplied failure policy out of range
    #[error("invalid failure policy: {0}")]
    Policy(#[from] PolicyError),

    /// Input text over the configured limit
    #[error("input of {size} bytes exceeds limit of {limit} bytes")]
    InputTooLarge {
        /// Input size
        size: usize,
        /// Configured limit
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_too_large_message() {
        let err = EngineError::InputTooLarge { size: 10, limit: 5 };
        assert_eq!(err.to_string(), "input of 10 bytes exceeds limit of 5 bytes");
    }

    #[test]
    fn config_error_converts() {
        let err: EngineError = ConfigError::Invalid("threshold must be >= 1".into()).into();
        assert!(matches!(err, EngineError::Config(ConfigError::Invalid(_))));
    }
}
