//! Timeline events recorded on a transaction.

use chrono::{DateTime, Utc};
use common::{FlowId, StepId};
use serde::{Deserialize, Serialize};

use crate::state::FlowState;

/// Events that can occur during a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FlowEvent {
    /// The flow started invoking steps.
    FlowStarted(FlowStartedData),

    /// A step's invoke handler was scheduled.
    StepStarted(StepData),

    /// A step's invoke handler returned an output.
    StepSucceeded(StepOutcomeData),

    /// A step's invoke handler failed (after any retries).
    StepFailed(StepOutcomeData),

    /// In-flight steps settled and compensation began.
    CompensationStarted(CompensationData),

    /// A step's compensate handler was scheduled.
    StepCompensating(StepData),

    /// A step was compensated successfully.
    StepCompensated(StepOutcomeData),

    /// A step's compensate handler failed (compensation continues).
    CompensationFailed(StepOutcomeData),

    /// A succeeded step was left alone during rollback.
    CompensationSkipped(StepData),

    /// The flow reached a terminal state.
    FlowFinished(FlowFinishedData),
}

impl FlowEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            FlowEvent::FlowStarted(_) => "FlowStarted",
            FlowEvent::StepStarted(_) => "StepStarted",
            FlowEvent::StepSucceeded(_) => "StepSucceeded",
            FlowEvent::StepFailed(_) => "StepFailed",
            FlowEvent::CompensationStarted(_) => "CompensationStarted",
            FlowEvent::StepCompensating(_) => "StepCompensating",
            FlowEvent::StepCompensated(_) => "StepCompensated",
            FlowEvent::CompensationFailed(_) => "CompensationFailed",
            FlowEvent::CompensationSkipped(_) => "CompensationSkipped",
            FlowEvent::FlowFinished(_) => "FlowFinished",
        }
    }

    /// Returns the step this event concerns, if any.
    pub fn step_id(&self) -> Option<&StepId> {
        match self {
            FlowEvent::StepStarted(data)
            | FlowEvent::StepCompensating(data)
            | FlowEvent::CompensationSkipped(data) => Some(&data.step_id),
            FlowEvent::StepSucceeded(data)
            | FlowEvent::StepFailed(data)
            | FlowEvent::StepCompensated(data)
            | FlowEvent::CompensationFailed(data) => Some(&data.step_id),
            FlowEvent::FlowStarted(_)
            | FlowEvent::CompensationStarted(_)
            | FlowEvent::FlowFinished(_) => None,
        }
    }
}

/// Data for FlowStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStartedData {
    pub flow_id: FlowId,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
}

/// Data for events that only name a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub step_id: StepId,
    pub at: DateTime<Utc>,
}

/// Data for events that close out a handler call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcomeData {
    pub step_id: StepId,
    /// Number of handler attempts, including retries.
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// Data for CompensationStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationData {
    /// The first step whose invoke failed.
    pub from_step: StepId,
    pub at: DateTime<Utc>,
}

/// Data for FlowFinished event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowFinishedData {
    pub state: FlowState,
    pub finished_at: DateTime<Utc>,
}

// Convenience constructors
impl FlowEvent {
    pub fn flow_started(flow_id: FlowId, workflow: impl Into<String>) -> Self {
        FlowEvent::FlowStarted(FlowStartedData {
            flow_id,
            workflow: workflow.into(),
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step_id: StepId) -> Self {
        FlowEvent::StepStarted(StepData {
            step_id,
            at: Utc::now(),
        })
    }

    pub fn step_succeeded(step_id: StepId, attempts: u32) -> Self {
        FlowEvent::StepSucceeded(StepOutcomeData {
            step_id,
            attempts,
            at: Utc::now(),
        })
    }

    pub fn step_failed(step_id: StepId, attempts: u32) -> Self {
        FlowEvent::StepFailed(StepOutcomeData {
            step_id,
            attempts,
            at: Utc::now(),
        })
    }

    pub fn compensation_started(from_step: StepId) -> Self {
        FlowEvent::CompensationStarted(CompensationData {
            from_step,
            at: Utc::now(),
        })
    }

    pub fn step_compensating(step_id: StepId) -> Self {
        FlowEvent::StepCompensating(StepData {
            step_id,
            at: Utc::now(),
        })
    }

    pub fn step_compensated(step_id: StepId, attempts: u32) -> Self {
        FlowEvent::StepCompensated(StepOutcomeData {
            step_id,
            attempts,
            at: Utc::now(),
        })
    }

    pub fn compensation_failed(step_id: StepId, attempts: u32) -> Self {
        FlowEvent::CompensationFailed(StepOutcomeData {
            step_id,
            attempts,
            at: Utc::now(),
        })
    }

    pub fn compensation_skipped(step_id: StepId) -> Self {
        FlowEvent::CompensationSkipped(StepData {
            step_id,
            at: Utc::now(),
        })
    }

    pub fn flow_finished(state: FlowState) -> Self {
        FlowEvent::FlowFinished(FlowFinishedData {
            state,
            finished_at: Utc::now(),
        })
    }
}
