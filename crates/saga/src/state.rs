//! Flow and step state machines.

use serde::{Deserialize, Serialize};

/// The state of a flow (one run of a workflow) in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Invoking ──┬──► Done
///                           └──► Reverting ──┬──► Reverted
///                                            └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// The flow has been created but no step has been scheduled.
    #[default]
    NotStarted,

    /// Steps are being invoked.
    Invoking,

    /// Every step succeeded (terminal state).
    Done,

    /// A step failed; in-flight steps are settling and compensation runs next.
    Reverting,

    /// Every eligible compensation succeeded (terminal state).
    Reverted,

    /// At least one compensation failed (terminal state).
    Failed,
}

impl FlowState {
    /// Returns true if the flow may move from `self` to `next`.
    pub fn can_transition_to(&self, next: FlowState) -> bool {
        matches!(
            (self, next),
            (FlowState::NotStarted, FlowState::Invoking)
                | (FlowState::Invoking, FlowState::Done)
                | (FlowState::Invoking, FlowState::Reverting)
                | (FlowState::Reverting, FlowState::Reverted)
                | (FlowState::Reverting, FlowState::Failed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Done | FlowState::Reverted | FlowState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::NotStarted => "not_started",
            FlowState::Invoking => "invoking",
            FlowState::Done => "done",
            FlowState::Reverting => "reverting",
            FlowState::Reverted => "reverted",
            FlowState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of a single step within a flow.
///
/// ```text
/// Pending ──► Invoking ──┬──► Failed
///                        └──► Succeeded ──► Compensating ──┬──► Compensated
///                                                          └──► CompensationFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Invoking,
    Succeeded,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl StepState {
    /// Returns true if the step may move from `self` to `next`.
    pub fn can_transition_to(&self, next: StepState) -> bool {
        matches!(
            (self, next),
            (StepState::Pending, StepState::Invoking)
                | (StepState::Invoking, StepState::Succeeded)
                | (StepState::Invoking, StepState::Failed)
                | (StepState::Succeeded, StepState::Compensating)
                | (StepState::Compensating, StepState::Compensated)
                | (StepState::Compensating, StepState::CompensationFailed)
        )
    }

    /// Returns true once the step will not change again within the current phase.
    pub fn is_settled(&self) -> bool {
        !matches!(
            self,
            StepState::Pending | StepState::Invoking | StepState::Compensating
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Invoking => "invoking",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
            StepState::Compensating => "compensating",
            StepState::Compensated => "compensated",
            StepState::CompensationFailed => "compensation_failed",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_states() {
        assert_eq!(FlowState::default(), FlowState::NotStarted);
        assert_eq!(StepState::default(), StepState::Pending);
    }

    #[test]
    fn test_flow_transitions() {
        assert!(FlowState::NotStarted.can_transition_to(FlowState::Invoking));
        assert!(FlowState::Invoking.can_transition_to(FlowState::Done));
        assert!(FlowState::Invoking.can_transition_to(FlowState::Reverting));
        assert!(FlowState::Reverting.can_transition_to(FlowState::Reverted));
        assert!(FlowState::Reverting.can_transition_to(FlowState::Failed));

        assert!(!FlowState::NotStarted.can_transition_to(FlowState::Done));
        assert!(!FlowState::Invoking.can_transition_to(FlowState::Reverted));
        assert!(!FlowState::Done.can_transition_to(FlowState::Reverting));
        assert!(!FlowState::Reverted.can_transition_to(FlowState::Invoking));
        assert!(!FlowState::Failed.can_transition_to(FlowState::Reverted));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!FlowState::NotStarted.is_terminal());
        assert!(!FlowState::Invoking.is_terminal());
        assert!(!FlowState::Reverting.is_terminal());
        assert!(FlowState::Done.is_terminal());
        assert!(FlowState::Reverted.is_terminal());
        assert!(FlowState::Failed.is_terminal());
    }

    #[test]
    fn test_step_transitions_are_monotonic() {
        assert!(StepState::Pending.can_transition_to(StepState::Invoking));
        assert!(StepState::Invoking.can_transition_to(StepState::Failed));
        assert!(StepState::Succeeded.can_transition_to(StepState::Compensating));
        assert!(StepState::Compensating.can_transition_to(StepState::CompensationFailed));

        assert!(!StepState::Failed.can_transition_to(StepState::Compensating));
        assert!(!StepState::Compensated.can_transition_to(StepState::Succeeded));
        assert!(!StepState::Succeeded.can_transition_to(StepState::Invoking));
        assert!(!StepState::Pending.can_transition_to(StepState::Succeeded));
    }

    #[test]
    fn test_display() {
        assert_eq!(FlowState::NotStarted.to_string(), "not_started");
        assert_eq!(FlowState::Reverted.to_string(), "reverted");
        assert_eq!(
            StepState::CompensationFailed.to_string(),
            "compensation_failed"
        );
    }

    #[test]
    fn test_serialization_matches_display() {
        let json = serde_json::to_string(&FlowState::Reverting).unwrap();
        assert_eq!(json, "\"reverting\"");
        let state: StepState = serde_json::from_str("\"compensation_failed\"").unwrap();
        assert_eq!(state, StepState::CompensationFailed);
    }
}
