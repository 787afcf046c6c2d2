//! Engine configuration loaded from environment variables.

use crate::error::ConfigError;

/// Orchestrator settings shared by every run of a workflow.
///
/// Reads from environment variables:
/// - `SAGA_MAX_CONCURRENCY` — maximum steps invoked at once, `0` for no limit (default: `0`)
/// - `SAGA_THROW_ON_ERROR` — default for [`RunOptions::throw_on_error`](crate::RunOptions::throw_on_error) (default: `true`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub throw_on_error: bool,
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_concurrency: match lookup("SAGA_MAX_CONCURRENCY") {
                Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "SAGA_MAX_CONCURRENCY",
                    value,
                    expected: "a non-negative integer",
                })?,
                None => defaults.max_concurrency,
            },
            throw_on_error: match lookup("SAGA_THROW_ON_ERROR") {
                Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid {
                    var: "SAGA_THROW_ON_ERROR",
                    value,
                    expected: "true or false",
                })?,
                None => defaults.throw_on_error,
            },
        })
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_throw_on_error(mut self, throw_on_error: bool) -> Self {
        self.throw_on_error = throw_on_error;
        self
    }

    /// Effective in-flight step limit.
    pub(crate) fn concurrency_limit(&self) -> usize {
        if self.max_concurrency == 0 {
            usize::MAX
        } else {
            self.max_concurrency
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            throw_on_error: true,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 0);
        assert!(config.throw_on_error);
        assert_eq!(config.concurrency_limit(), usize::MAX);
    }

    #[test]
    fn test_builder_overrides() {
        let config = EngineConfig::default()
            .with_max_concurrency(2)
            .with_throw_on_error(false);
        assert_eq!(config.concurrency_limit(), 2);
        assert!(!config.throw_on_error);
    }

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_from_vars_reads_values() {
        let config = from_pairs(&[
            ("SAGA_MAX_CONCURRENCY", " 4 "),
            ("SAGA_THROW_ON_ERROR", "off"),
        ])
        .unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert!(!config.throw_on_error);
        assert_eq!(from_pairs(&[]).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_from_vars_rejects_bad_concurrency() {
        assert_eq!(
            from_pairs(&[("SAGA_MAX_CONCURRENCY", "lots")]),
            Err(ConfigError::Invalid {
                var: "SAGA_MAX_CONCURRENCY",
                value: "lots".to_string(),
                expected: "a non-negative integer",
            })
        );
        assert!(from_pairs(&[("SAGA_MAX_CONCURRENCY", "-1")]).is_err());
    }

    #[test]
    fn test_from_vars_rejects_bad_flag() {
        let err = from_pairs(&[("SAGA_THROW_ON_ERROR", "maybe")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for SAGA_THROW_ON_ERROR: \"maybe\" (expected true or false)"
        );
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
