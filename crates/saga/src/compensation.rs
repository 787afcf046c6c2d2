//! Compensation orchestrator: rolls back a failed flow.
//!
//! Succeeded steps are compensated one at a time in reverse completion
//! order, which guarantees a step is undone only after everything that
//! consumed its output. Rollback is best-effort: a failing compensate
//! handler is recorded and the walk continues with the next step.

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::context::ContextStore;
use crate::error::{HandlerType, StepError};
use crate::registry::Workflow;
use crate::retry;
use crate::state::FlowState;
use crate::step::{self, StepContext};
use crate::transaction::Transaction;

pub(crate) async fn compensate<E>(
    workflow: &Workflow<E>,
    tx: &mut Transaction<E>,
    input: &Arc<Value>,
    context: &Arc<ContextStore>,
) where
    E: From<StepError> + Debug + Send + 'static,
{
    tx.compensation_started();
    tracing::info!(
        failed_step = ?tx.failed_step(),
        to_compensate = tx.completion_indices().len(),
        "starting compensation"
    );

    let order: Vec<usize> = tx.completion_indices().iter().rev().copied().collect();
    for index in order {
        let node = &workflow.nodes()[index];

        if node.flags.no_compensation {
            tracing::debug!(step = %node.id, "compensation skipped");
            tx.compensation_skipped(index);
            continue;
        }

        tx.step_compensating(index);
        let ctx = StepContext::new(
            tx.id(),
            node.id.clone(),
            Arc::clone(input),
            Arc::clone(context),
        );
        let handler = &node.handler;
        let (result, attempts) = retry::with_retry(
            node.retry.as_ref(),
            HandlerType::Compensate,
            &node.id,
            |attempt| {
                let ctx = ctx.with_attempt(attempt);
                async move { step::compensate_guarded(handler.as_ref(), &ctx).await }
            },
        )
        .await;

        match result {
            Ok(()) => {
                metrics::counter!(
                    "saga_compensations_total",
                    "workflow" => workflow.name().to_string(),
                    "step" => node.id.to_string()
                )
                .increment(1);
                tracing::info!(step = %node.id, attempts, "step compensated");
                tx.step_compensated(index, attempts);
            }
            Err(error) => {
                tracing::error!(step = %node.id, attempts, ?error, "compensation failed");
                tx.step_compensation_failed(index, error, attempts);
            }
        }
    }

    let state = if tx.has_compensation_failure() {
        FlowState::Failed
    } else {
        FlowState::Reverted
    };
    tx.finish(state);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::error::StepError;
    use crate::executor::RunOptions;
    use crate::state::StepState;
    use crate::step::{HandlerSet, Step};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(id: &'static str, log: &Log) -> HandlerSet {
        let undo_log = Arc::clone(log);
        HandlerSet::new(move |_| async move { Ok(json!(id)) }).with_compensate(move |_| {
            let log = Arc::clone(&undo_log);
            async move {
                log.lock().unwrap().push(id.to_string());
                Ok(())
            }
        })
    }

    fn failing() -> HandlerSet {
        HandlerSet::new(|_| async { Err(StepError::new("PaymentDeclined")) })
    }

    #[tokio::test]
    async fn test_compensates_in_reverse_completion_order() {
        let log: Log = Arc::default();
        let wf = Workflow::define(
            "order",
            [
                Step::new("reserve", recording("reserve", &log)),
                Step::new("hold", recording("hold", &log)),
                Step::new("charge", failing()),
            ],
        )
        .unwrap();

        let run = wf
            .run(RunOptions::new(Value::Null).throw_on_error(false))
            .await
            .unwrap();

        assert_eq!(run.state(), FlowState::Reverted);
        assert_eq!(*log.lock().unwrap(), vec!["hold", "reserve"]);
        let tx = run.transaction();
        assert_eq!(tx.step_state("reserve"), Some(StepState::Compensated));
        assert_eq!(tx.step_state("charge"), Some(StepState::Failed));
        let mut reversed = tx.completion_order();
        reversed.reverse();
        assert_eq!(tx.compensation_order(), reversed);
    }

    #[tokio::test]
    async fn test_compensation_failure_is_best_effort() {
        let log: Log = Arc::default();
        let broken = HandlerSet::new(|_| async { Ok(Value::Null) })
            .with_compensate(|_| async { Err(StepError::new("release failed")) });
        let wf = Workflow::define(
            "order",
            [
                Step::new("reserve", recording("reserve", &log)),
                Step::new("hold", broken),
                Step::new("charge", failing()),
            ],
        )
        .unwrap();

        let run = wf
            .run(RunOptions::new(Value::Null).throw_on_error(false))
            .await
            .unwrap();

        assert_eq!(run.state(), FlowState::Failed);
        assert_eq!(*log.lock().unwrap(), vec!["reserve"]);
        assert_eq!(run.errors().len(), 2);
        assert_eq!(run.errors()[1].handler_type, HandlerType::Compensate);
        assert_eq!(run.errors()[1].step_id, "hold");
        assert_eq!(
            run.transaction().step_state("hold"),
            Some(StepState::CompensationFailed)
        );
    }

    #[tokio::test]
    async fn test_no_compensation_steps_are_left_succeeded() {
        let log: Log = Arc::default();
        let wf = Workflow::define(
            "order",
            [
                Step::new("reserve", recording("reserve", &log)),
                Step::new("notify", recording("notify", &log)).no_compensation(),
                Step::new("charge", failing()),
            ],
        )
        .unwrap();

        let run = wf
            .run(RunOptions::new(Value::Null).throw_on_error(false))
            .await
            .unwrap();

        assert_eq!(run.state(), FlowState::Reverted);
        assert_eq!(*log.lock().unwrap(), vec!["reserve"]);
        assert_eq!(
            run.transaction().step_state("notify"),
            Some(StepState::Succeeded)
        );
        assert!(run.transaction().events().iter().any(|e| {
            e.event_type() == "CompensationSkipped" && e.step_id().is_some_and(|s| s == "notify")
        }));
    }

    #[tokio::test]
    async fn test_failure_of_first_step_compensates_nothing() {
        let wf = Workflow::define("order", [Step::new("charge", failing())]).unwrap();

        let run = wf
            .run(RunOptions::new(Value::Null).throw_on_error(false))
            .await
            .unwrap();

        assert_eq!(run.state(), FlowState::Reverted);
        assert!(run.transaction().compensation_order().is_empty());
        assert_eq!(run.errors().len(), 1);
    }
}
