//! Execution orchestrator: drives a workflow forward.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use common::FlowId;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use serde_json::{Map, Value};

use crate::compensation;
use crate::context::ContextStore;
use crate::error::{DefinitionError, ErrorRecord, HandlerType, RunError, StepError};
use crate::registry::Workflow;
use crate::retry::{self, RetryPolicy};
use crate::state::{FlowState, StepState};
use crate::step::{self, StepContext, StepHandler};
use crate::transaction::Transaction;

/// Options for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    input: Value,
    throw_on_error: Option<bool>,
    context: Map<String, Value>,
    transaction_id: Option<FlowId>,
}

impl RunOptions {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    /// Whether a run that does not end `done` is returned as
    /// [`RunError::Failed`]. Defaults to the workflow's [`EngineConfig`](crate::EngineConfig).
    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = Some(throw);
        self
    }

    /// Adds a read-only seed value to the run's context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Runs under a caller-chosen flow ID instead of a fresh one.
    pub fn transaction_id(mut self, id: FlowId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    pub fn input(&self) -> &Value {
        &self.input
    }
}

/// Outcome of a run: `{ result, errors, transaction }`.
#[derive(Debug)]
pub struct WorkflowRun<E> {
    result: Option<Value>,
    transaction: Transaction<E>,
}

impl<E> WorkflowRun<E> {
    /// The designated result step's output (or the whole context). `None`
    /// unless the flow ended `done`.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn errors(&self) -> &[ErrorRecord<E>] {
        self.transaction.errors()
    }

    pub fn transaction(&self) -> &Transaction<E> {
        &self.transaction
    }

    pub fn state(&self) -> FlowState {
        self.transaction.state()
    }

    pub fn is_done(&self) -> bool {
        self.state() == FlowState::Done
    }

    pub fn into_parts(self) -> (Option<Value>, Transaction<E>) {
        (self.result, self.transaction)
    }
}

impl<E: Serialize> Serialize for WorkflowRun<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("WorkflowRun", 3)?;
        state.serialize_field("result", &self.result)?;
        state.serialize_field("errors", self.errors())?;
        state.serialize_field("transaction", &self.transaction)?;
        state.end()
    }
}

struct InvokeOutcome<E> {
    index: usize,
    result: Result<Value, E>,
    attempts: u32,
}

impl<E> Workflow<E>
where
    E: From<StepError> + Debug + Send + 'static,
{
    /// Runs the workflow once.
    ///
    /// Seals the workflow against further mutation. Independent steps are
    /// invoked concurrently; the first invoke failure stops new steps from
    /// being scheduled, waits for in-flight steps to settle, then compensates
    /// every succeeded step in reverse completion order.
    ///
    /// A handler that panics fails its step like a returned error; the panic
    /// message reaches the error list through `E: From<StepError>`.
    ///
    /// # Errors
    ///
    /// - [`RunError::Definition`] if the workflow has no steps.
    /// - [`RunError::ContextConflict`] if a seed key names a step.
    /// - [`RunError::Failed`] if the flow does not end `done` and
    ///   `throw_on_error` is in effect.
    #[tracing::instrument(skip_all, fields(workflow = %self.name(), flow_id = tracing::field::Empty))]
    pub async fn run(&self, options: RunOptions) -> Result<WorkflowRun<E>, RunError<E>> {
        if self.is_empty() {
            return Err(DefinitionError::Empty(self.name().to_string()).into());
        }
        if let Some(key) = options.context.keys().find(|k| self.contains(k)) {
            return Err(RunError::ContextConflict(key.as_str().into()));
        }
        if self.seal() {
            tracing::debug!("workflow sealed on first run");
        }

        let throw_on_error = options
            .throw_on_error
            .unwrap_or(self.config().throw_on_error);
        let flow_id = options.transaction_id.unwrap_or_default();
        tracing::Span::current().record("flow_id", tracing::field::display(flow_id));

        let workflow = self.name().to_string();
        metrics::counter!("saga_runs_total", "workflow" => workflow.clone()).increment(1);
        let run_start = Instant::now();

        let context = Arc::new(ContextStore::new(self.step_ids(), options.context));
        let input = Arc::new(options.input);
        let mut tx = Transaction::new(flow_id, workflow.clone(), self.step_ids(), context.clone());

        tx.start();
        tracing::info!(steps = self.len(), "workflow started");

        self.invoke_steps(&mut tx, &input, &context).await;

        if tx.state() == FlowState::Invoking {
            tx.finish(FlowState::Done);
        } else {
            compensation::compensate(self, &mut tx, &input, &context).await;
        }

        let duration = run_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds", "workflow" => workflow.clone())
            .record(duration);

        let result = match tx.state() {
            FlowState::Done => {
                metrics::counter!("saga_runs_completed").increment(1);
                tracing::info!(duration, "workflow completed");
                Some(match self.result_index() {
                    Some(i) => context
                        .get(self.nodes()[i].id.as_str())
                        .cloned()
                        .unwrap_or(Value::Null),
                    None => Value::Object(context.outputs()),
                })
            }
            FlowState::Reverted => {
                metrics::counter!("saga_runs_reverted").increment(1);
                tracing::warn!(duration, errors = tx.errors().len(), "workflow reverted");
                None
            }
            state => {
                metrics::counter!("saga_runs_failed").increment(1);
                tracing::warn!(
                    duration,
                    %state,
                    errors = tx.errors().len(),
                    "workflow failed to revert cleanly"
                );
                None
            }
        };

        let run = WorkflowRun {
            result,
            transaction: tx,
        };
        if throw_on_error && !run.is_done() {
            return Err(RunError::Failed(Box::new(run)));
        }
        Ok(run)
    }

    /// Forward phase. Returns once no step is in flight and none can start.
    async fn invoke_steps(
        &self,
        tx: &mut Transaction<E>,
        input: &Arc<Value>,
        context: &Arc<ContextStore>,
    ) {
        let limit = self.config().concurrency_limit();
        let mut in_flight = FuturesUnordered::new();

        loop {
            if tx.state() == FlowState::Invoking {
                for index in self.ready_steps(tx) {
                    if in_flight.len() >= limit {
                        break;
                    }
                    let node = &self.nodes()[index];
                    tx.step_started(index);
                    let ctx = StepContext::new(
                        tx.id(),
                        node.id.clone(),
                        Arc::clone(input),
                        Arc::clone(context),
                    );
                    in_flight.push(invoke_step(
                        index,
                        Arc::clone(&node.handler),
                        Arc::clone(&node.retry),
                        ctx,
                    ));
                }
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };

            let node = &self.nodes()[outcome.index];
            match outcome.result {
                Ok(output) => {
                    // Each step is scheduled once per run, so its slot is empty.
                    let written = context.write(outcome.index, output);
                    debug_assert!(written.is_ok(), "output of {} written twice", node.id);
                    tx.step_succeeded(outcome.index, outcome.attempts);
                    tracing::debug!(step = %node.id, attempts = outcome.attempts, "step succeeded");
                }
                Err(error) => {
                    tracing::warn!(
                        step = %node.id,
                        attempts = outcome.attempts,
                        ?error,
                        "step invoke failed"
                    );
                    metrics::counter!(
                        "saga_step_failures_total",
                        "workflow" => self.name().to_string(),
                        "step" => node.id.to_string()
                    )
                    .increment(1);
                    tx.step_failed(outcome.index, error, outcome.attempts);
                }
            }
        }
    }

    /// Pending steps whose dependencies have all succeeded, in declaration order.
    fn ready_steps(&self, tx: &Transaction<E>) -> Vec<usize> {
        self.nodes()
            .iter()
            .enumerate()
            .filter(|(i, node)| {
                tx.step_state_at(*i) == StepState::Pending
                    && node
                        .depends_on
                        .iter()
                        .all(|&dep| tx.step_state_at(dep) == StepState::Succeeded)
            })
            .map(|(i, _)| i)
            .collect()
    }
}

async fn invoke_step<E: From<StepError>>(
    index: usize,
    handler: Arc<dyn StepHandler<E>>,
    policy: Arc<dyn RetryPolicy>,
    ctx: StepContext,
) -> InvokeOutcome<E> {
    let step_id = ctx.step_id().clone();
    let (result, attempts) =
        retry::with_retry(policy.as_ref(), HandlerType::Invoke, &step_id, |attempt| {
            let ctx = ctx.with_attempt(attempt);
            let handler = Arc::clone(&handler);
            async move { step::invoke_guarded(handler.as_ref(), &ctx).await }
        })
        .await;
    InvokeOutcome {
        index,
        result,
        attempts,
    }
}
