//! Runner configuration loaded from environment variables.

use std::str::FromStr;

use saga::EngineConfig;
use serde_json::Value;

use crate::error::{Result, RunnerError};

/// Demo workflow to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowKind {
    #[default]
    Order,
    Cart,
}

impl FromStr for WorkflowKind {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" => Ok(Self::Order),
            "cart" => Ok(Self::Cart),
            other => Err(RunnerError::config(
                "RUNNER_WORKFLOW",
                format!("unknown workflow {other:?}, expected \"order\" or \"cart\""),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(RunnerError::config(
                "LOG_FORMAT",
                format!("unknown format {other:?}, expected \"text\" or \"json\""),
            )),
        }
    }
}

/// Runner configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `RUNNER_WORKFLOW` — `order` or `cart` (default: `order`)
/// - `RUNNER_FAIL_AFTER` — step id after which a failing step is spliced in
/// - `RUNNER_INPUT` — JSON input replacing the demo input
///
/// Engine settings come from [`EngineConfig::from_vars`] over the same lookup.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub workflow: WorkflowKind,
    pub fail_after: Option<String>,
    pub input: Option<Value>,
    pub engine: EngineConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| v.parse::<LogFormat>())
                .transpose()?
                .unwrap_or(defaults.log_format),
            workflow: lookup("RUNNER_WORKFLOW")
                .map(|v| v.parse::<WorkflowKind>())
                .transpose()?
                .unwrap_or(defaults.workflow),
            fail_after: lookup("RUNNER_FAIL_AFTER").filter(|v| !v.trim().is_empty()),
            input: lookup("RUNNER_INPUT")
                .map(|v| {
                    serde_json::from_str(&v)
                        .map_err(|e| RunnerError::config("RUNNER_INPUT", e.to_string()))
                })
                .transpose()?,
            engine: EngineConfig::from_vars(&lookup)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            workflow: WorkflowKind::Order,
            fail_after: None,
            input: None,
            engine: EngineConfig::default(),
        }
    }
}
