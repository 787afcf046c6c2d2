//! Error types for workflow definition and execution.

use std::fmt::Debug;

use common::StepId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::executor::WorkflowRun;

/// Default error payload produced by step handlers.
///
/// Carries a human-readable `message` plus any domain-specific fields,
/// which serialize flattened next to the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StepError {
    /// Creates an error with the given message and no extra fields.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Attaches a domain-specific field to the error.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns a domain-specific field, if present.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<ContextError> for StepError {
    fn from(err: ContextError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("Serialization error: {err}"))
    }
}

/// Which handler of a step produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerType {
    Invoke,
    Compensate,
}

impl HandlerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerType::Invoke => "invoke",
            HandlerType::Compensate => "compensate",
        }
    }
}

impl std::fmt::Display for HandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failure recorded during a run.
///
/// Serializes as `{ "action", "handlerType", "error" }`; the `error` payload
/// is whatever the handler returned, untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord<E> {
    #[serde(rename = "action")]
    pub step_id: StepId,
    pub handler_type: HandlerType,
    pub error: E,
}

impl<E> ErrorRecord<E> {
    pub fn invoke(step_id: StepId, error: E) -> Self {
        Self {
            step_id,
            handler_type: HandlerType::Invoke,
            error,
        }
    }

    pub fn compensate(step_id: StepId, error: E) -> Self {
        Self {
            step_id,
            handler_type: HandlerType::Compensate,
            error,
        }
    }
}

/// Errors raised while building or mutating a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// The workflow has no steps.
    #[error("Workflow '{0}' has no steps")]
    Empty(String),

    /// A step with the same ID is already defined.
    #[error("Step ID already exists: {0}")]
    DuplicateStep(StepId),

    /// A referenced step (dependency, insertion target or result step) does not exist.
    #[error("Step not found: {0}")]
    UnknownStep(StepId),

    /// The change would make the step graph cyclic.
    #[error("Dependency cycle detected through step: {0}")]
    Cycle(StepId),

    /// The workflow has already been run and can no longer change.
    #[error("Workflow '{0}' has already run and can no longer be modified")]
    Sealed(String),
}

/// Errors raised by the per-run context store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// No output recorded under the key (the step never ran or is still pending).
    #[error("No output recorded for: {0}")]
    NotFound(String),

    /// The step's output slot was already written.
    #[error("Output for step '{0}' has already been recorded")]
    AlreadyWritten(StepId),
}

/// Errors raised while loading [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable is set to something that cannot be parsed.
    #[error("Invalid value for {var}: {value:?} (expected {expected})")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Errors returned by [`Workflow::run`](crate::Workflow::run).
#[derive(Debug, Error)]
pub enum RunError<E: Debug> {
    /// The workflow cannot be run as defined.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// A seed context key collides with a step ID.
    #[error("Seed context key collides with step: {0}")]
    ContextConflict(StepId),

    /// The flow ended in a state other than `done` and `throw_on_error` was set.
    #[error(
        "Workflow '{}' ended in state {} after step failure",
        .0.transaction().workflow(),
        .0.state()
    )]
    Failed(Box<WorkflowRun<E>>),
}

impl<E: Debug> RunError<E> {
    /// Returns the error records of a failed run; empty for other variants.
    pub fn errors(&self) -> &[ErrorRecord<E>] {
        match self {
            RunError::Failed(run) => run.errors(),
            _ => &[],
        }
    }

    /// Returns the failed run, if this error carries one.
    pub fn run(&self) -> Option<&WorkflowRun<E>> {
        match self {
            RunError::Failed(run) => Some(run),
            _ => None,
        }
    }

    /// Consumes the error, returning the failed run if there is one.
    pub fn into_run(self) -> Option<WorkflowRun<E>> {
        match self {
            RunError::Failed(run) => Some(*run),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_step_error_serializes_fields_flat() {
        let err = StepError::new("Insufficient stock").with_field("sku", "SKU-001");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            json!({ "message": "Insufficient stock", "sku": "SKU-001" })
        );
        assert_eq!(err.to_string(), "Insufficient stock");
    }

    #[test]
    fn test_step_error_deserializes_unknown_fields() {
        let err: StepError =
            serde_json::from_value(json!({ "message": "declined", "code": 402 })).unwrap();
        assert_eq!(err.message, "declined");
        assert_eq!(err.field("code"), Some(&json!(402)));
    }

    #[test]
    fn test_error_record_boundary_shape() {
        let record = ErrorRecord::invoke(
            StepId::from("charge_payment"),
            StepError::new("PaymentDeclined"),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            json!({
                "action": "charge_payment",
                "handlerType": "invoke",
                "error": { "message": "PaymentDeclined" }
            })
        );
    }

    #[test]
    fn test_definition_error_display() {
        let err = DefinitionError::DuplicateStep(StepId::from("a"));
        assert_eq!(err.to_string(), "Step ID already exists: a");

        let err = DefinitionError::Sealed("checkout".to_string());
        assert!(err.to_string().contains("checkout"));
    }

    #[test]
    fn test_run_error_accessors_for_definition_error() {
        let err: RunError<StepError> = DefinitionError::Empty("empty".to_string()).into();
        assert!(err.errors().is_empty());
        assert!(err.run().is_none());
        assert_eq!(err.to_string(), "Workflow 'empty' has no steps");
    }
}
