//! Runner error types.

use saga::{ConfigError, DefinitionError, RunError, StepError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// An environment variable holds a value that cannot be used.
    #[error("Invalid value for {var}: {reason}")]
    Config { var: &'static str, reason: String },

    /// The demo workflow could not be built.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// The workflow run did not end `done`, or could not start.
    #[error(transparent)]
    Run(#[from] RunError<StepError>),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunnerError {
    pub(crate) fn config(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Config {
            var,
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for RunnerError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid {
                var,
                value,
                expected,
            } => Self::config(var, format!("{value:?} is not {expected}")),
        }
    }
}

/// Convenience type alias for runner results.
pub type Result<T> = std::result::Result<T, RunnerError>;
