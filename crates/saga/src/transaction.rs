//! The transaction: per-run flow state, step states, errors and timeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{FlowId, StepId};
use serde::Serialize;
use serde::ser::Serializer;

use crate::context::ContextStore;
use crate::error::ErrorRecord;
use crate::events::FlowEvent;
use crate::state::{FlowState, StepState};

/// One execution of a workflow against one input.
///
/// Mutated only by the orchestrator while the run is in progress; callers
/// receive it once it has reached a terminal state.
#[derive(Debug)]
pub struct Transaction<E> {
    id: FlowId,
    workflow: String,
    state: FlowState,
    steps: Vec<StepId>,
    step_states: Vec<StepState>,
    errors: Vec<ErrorRecord<E>>,
    first_failure: Option<usize>,
    completion_order: Vec<usize>,
    compensation_order: Vec<usize>,
    events: Vec<FlowEvent>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    context: Arc<ContextStore>,
}

// Query methods
impl<E> Transaction<E> {
    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn step_state(&self, id: &str) -> Option<StepState> {
        self.steps
            .iter()
            .position(|s| s.as_str() == id)
            .map(|i| self.step_states[i])
    }

    pub fn step_states(&self) -> BTreeMap<StepId, StepState> {
        self.steps
            .iter()
            .cloned()
            .zip(self.step_states.iter().copied())
            .collect()
    }

    pub fn errors(&self) -> &[ErrorRecord<E>] {
        &self.errors
    }

    /// Steps in the order their invoke handlers succeeded.
    pub fn completion_order(&self) -> Vec<StepId> {
        self.ids(&self.completion_order)
    }

    /// Steps in the order their compensate handlers were called.
    pub fn compensation_order(&self) -> Vec<StepId> {
        self.ids(&self.compensation_order)
    }

    /// The first step whose invoke failed.
    pub fn failed_step(&self) -> Option<&StepId> {
        self.first_failure.map(|i| &self.steps[i])
    }

    pub fn events(&self) -> &[FlowEvent] {
        &self.events
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    fn ids(&self, indices: &[usize]) -> Vec<StepId> {
        indices.iter().map(|&i| self.steps[i].clone()).collect()
    }
}

// State transitions, driven by the orchestrators.
impl<E> Transaction<E> {
    pub(crate) fn new(
        id: FlowId,
        workflow: impl Into<String>,
        steps: Vec<StepId>,
        context: Arc<ContextStore>,
    ) -> Self {
        let step_states = vec![StepState::Pending; steps.len()];
        Self {
            id,
            workflow: workflow.into(),
            state: FlowState::NotStarted,
            steps,
            step_states,
            errors: Vec::new(),
            first_failure: None,
            completion_order: Vec::new(),
            compensation_order: Vec::new(),
            events: Vec::new(),
            started_at: None,
            finished_at: None,
            context,
        }
    }

    pub(crate) fn start(&mut self) {
        self.set_state(FlowState::Invoking);
        self.started_at = Some(Utc::now());
        self.events
            .push(FlowEvent::flow_started(self.id, self.workflow.clone()));
    }

    pub(crate) fn step_state_at(&self, index: usize) -> StepState {
        self.step_states[index]
    }

    pub(crate) fn completion_indices(&self) -> &[usize] {
        &self.completion_order
    }

    pub(crate) fn step_started(&mut self, index: usize) {
        self.set_step(index, StepState::Invoking);
        self.events
            .push(FlowEvent::step_started(self.steps[index].clone()));
    }

    pub(crate) fn step_succeeded(&mut self, index: usize, attempts: u32) {
        self.set_step(index, StepState::Succeeded);
        self.completion_order.push(index);
        self.events
            .push(FlowEvent::step_succeeded(self.steps[index].clone(), attempts));
    }

    /// Records an invoke failure. The first one moves the flow to `Reverting`.
    pub(crate) fn step_failed(&mut self, index: usize, error: E, attempts: u32) {
        self.set_step(index, StepState::Failed);
        let step_id = self.steps[index].clone();
        self.errors.push(ErrorRecord::invoke(step_id.clone(), error));
        self.events.push(FlowEvent::step_failed(step_id, attempts));
        if self.first_failure.is_none() {
            self.first_failure = Some(index);
            self.set_state(FlowState::Reverting);
        }
    }

    pub(crate) fn compensation_started(&mut self) {
        if let Some(i) = self.first_failure {
            self.events
                .push(FlowEvent::compensation_started(self.steps[i].clone()));
        }
    }

    pub(crate) fn compensation_skipped(&mut self, index: usize) {
        self.events
            .push(FlowEvent::compensation_skipped(self.steps[index].clone()));
    }

    pub(crate) fn step_compensating(&mut self, index: usize) {
        self.set_step(index, StepState::Compensating);
        self.compensation_order.push(index);
        self.events
            .push(FlowEvent::step_compensating(self.steps[index].clone()));
    }

    pub(crate) fn step_compensated(&mut self, index: usize, attempts: u32) {
        self.set_step(index, StepState::Compensated);
        self.events
            .push(FlowEvent::step_compensated(self.steps[index].clone(), attempts));
    }

    pub(crate) fn step_compensation_failed(&mut self, index: usize, error: E, attempts: u32) {
        self.set_step(index, StepState::CompensationFailed);
        let step_id = self.steps[index].clone();
        self.errors
            .push(ErrorRecord::compensate(step_id.clone(), error));
        self.events
            .push(FlowEvent::compensation_failed(step_id, attempts));
    }

    pub(crate) fn has_compensation_failure(&self) -> bool {
        self.step_states
            .iter()
            .any(|s| *s == StepState::CompensationFailed)
    }

    pub(crate) fn finish(&mut self, state: FlowState) {
        self.set_state(state);
        self.finished_at = Some(Utc::now());
        self.events.push(FlowEvent::flow_finished(state));
    }

    fn set_state(&mut self, next: FlowState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid flow transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(flow_id = %self.id, from = %self.state, to = %next, "flow state changed");
        self.state = next;
    }

    fn set_step(&mut self, index: usize, next: StepState) {
        let current = self.step_states[index];
        debug_assert!(
            current.can_transition_to(next),
            "invalid step transition for '{}': {} -> {}",
            self.steps[index],
            current,
            next
        );
        tracing::debug!(
            flow_id = %self.id,
            step = %self.steps[index],
            from = %current,
            to = %next,
            "step state changed"
        );
        self.step_states[index] = next;
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowView<'a> {
    id: FlowId,
    workflow: &'a str,
    state: FlowState,
    step_states: BTreeMap<&'a str, StepState>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct TransactionView<'a> {
    flow: FlowView<'a>,
    context: serde_json::Map<String, serde_json::Value>,
    events: &'a [FlowEvent],
}

/// Serializes as `{ flow: { state, stepStates, .. }, context, events }`.
/// Error records are serialized by the enclosing run.
impl<E> Serialize for Transaction<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let view = TransactionView {
            flow: FlowView {
                id: self.id,
                workflow: &self.workflow,
                state: self.state,
                step_states: self
                    .steps
                    .iter()
                    .map(StepId::as_str)
                    .zip(self.step_states.iter().copied())
                    .collect(),
                started_at: self.started_at,
                finished_at: self.finished_at,
            },
            context: self.context.outputs(),
            events: &self.events,
        };
        view.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::error::HandlerType;

    fn transaction() -> Transaction<String> {
        let steps = vec![StepId::from("reserve"), StepId::from("charge")];
        let context = Arc::new(ContextStore::new(steps.clone(), Map::new()));
        Transaction::new(FlowId::new(), "order", steps, context)
    }

    #[test]
    fn test_new_transaction_is_not_started() {
        let tx = transaction();
        assert_eq!(tx.state(), FlowState::NotStarted);
        assert_eq!(tx.step_state("reserve"), Some(StepState::Pending));
        assert_eq!(tx.step_state("unknown"), None);
        assert!(tx.started_at().is_none());
    }

    #[test]
    fn test_failure_moves_flow_to_reverting_once() {
        let mut tx = transaction();
        tx.start();
        tx.step_started(0);
        tx.step_started(1);
        tx.step_failed(1, "declined".to_string(), 1);
        tx.step_failed(0, "timeout".to_string(), 1);

        assert_eq!(tx.state(), FlowState::Reverting);
        assert_eq!(tx.failed_step(), Some(&StepId::from("charge")));
        assert_eq!(tx.errors().len(), 2);
        assert_eq!(tx.errors()[0].handler_type, HandlerType::Invoke);
        assert_eq!(tx.errors()[0].error, "declined");
    }

    #[test]
    fn test_compensation_bookkeeping() {
        let mut tx = transaction();
        tx.start();
        tx.step_started(0);
        tx.step_succeeded(0, 1);
        tx.step_started(1);
        tx.step_failed(1, "declined".to_string(), 1);
        tx.compensation_started();
        tx.step_compensating(0);
        tx.step_compensation_failed(0, "release failed".to_string(), 2);
        tx.finish(FlowState::Failed);

        assert!(tx.is_terminal());
        assert!(tx.has_compensation_failure());
        assert_eq!(tx.completion_order(), vec![StepId::from("reserve")]);
        assert_eq!(tx.compensation_order(), vec![StepId::from("reserve")]);
        assert_eq!(tx.errors()[1].handler_type, HandlerType::Compensate);
        assert_eq!(
            tx.events().last().map(FlowEvent::event_type),
            Some("FlowFinished")
        );
    }

    #[test]
    fn test_serialized_shape() {
        let mut tx = transaction();
        tx.start();
        tx.step_started(0);
        tx.context.write(0, json!({ "reservation_id": "RES-0001" })).unwrap();
        tx.step_succeeded(0, 1);

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["flow"]["state"], "invoking");
        assert_eq!(json["flow"]["stepStates"]["reserve"], "succeeded");
        assert_eq!(json["flow"]["stepStates"]["charge"], "pending");
        assert_eq!(json["context"]["reserve"]["reservation_id"], "RES-0001");
        assert_eq!(json["events"][0]["type"], "FlowStarted");
    }
}
