//! Step declarations and the handler capability they carry.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use common::{FlowId, StepId};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::context::ContextStore;
use crate::error::{ContextError, HandlerType, StepError};
use crate::retry::{NoRetry, RetryPolicy};

/// What a handler sees when it is called.
///
/// Cheap to clone: the input and the context store are shared with every
/// other step of the same flow.
#[derive(Debug, Clone)]
pub struct StepContext {
    flow_id: FlowId,
    step_id: StepId,
    attempt: u32,
    input: Arc<Value>,
    context: Arc<ContextStore>,
}

impl StepContext {
    pub(crate) fn new(
        flow_id: FlowId,
        step_id: StepId,
        input: Arc<Value>,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            flow_id,
            step_id,
            attempt: 1,
            input,
            context,
        }
    }

    pub(crate) fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    /// 1-based attempt number of the current handler call.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The input the workflow was run with.
    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    /// Output of another step (or a seed value).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn require(&self, key: &str) -> Result<&Value, ContextError> {
        self.context.require(key)
    }

    /// This step's own recorded output. Set when compensating a succeeded step.
    pub fn output(&self) -> Option<&Value> {
        self.context.get(self.step_id.as_str())
    }
}

/// The forward action of a step and its optional undo.
///
/// `E` is the handler's own error payload; the engine records it in the
/// flow's error list without looking inside.
#[async_trait]
pub trait StepHandler<E = StepError>: Send + Sync {
    /// Performs the step, returning the output recorded in the context.
    async fn invoke(&self, ctx: &StepContext) -> Result<Value, E>;

    /// Undoes a successful [`invoke`](Self::invoke).
    ///
    /// Called at most once, after every step that depended on this one has
    /// been compensated. The default is a no-op, suitable for read-only steps.
    async fn compensate(&self, ctx: &StepContext) -> Result<(), E> {
        let _ = ctx;
        Ok(())
    }
}

type InvokeFn<E> = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Value, E>> + Send + Sync>;
type CompensateFn<E> = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

/// Closure-based handler: an `invoke` function and an optional `compensate`.
pub struct HandlerSet<E = StepError> {
    invoke: InvokeFn<E>,
    compensate: Option<CompensateFn<E>>,
}

impl<E: Send + 'static> HandlerSet<E> {
    pub fn new<F, Fut>(invoke: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
    {
        Self {
            invoke: Arc::new(move |ctx| Box::pin(invoke(ctx))),
            compensate: None,
        }
    }

    pub fn with_compensate<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |ctx| Box::pin(compensate(ctx))));
        self
    }

    pub fn has_compensate(&self) -> bool {
        self.compensate.is_some()
    }
}

impl<E> Clone for HandlerSet<E> {
    fn clone(&self) -> Self {
        Self {
            invoke: Arc::clone(&self.invoke),
            compensate: self.compensate.clone(),
        }
    }
}

impl<E> std::fmt::Debug for HandlerSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("compensate", &self.compensate.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Send + 'static> StepHandler<E> for HandlerSet<E> {
    async fn invoke(&self, ctx: &StepContext) -> Result<Value, E> {
        (self.invoke)(ctx.clone()).await
    }

    async fn compensate(&self, ctx: &StepContext) -> Result<(), E> {
        match &self.compensate {
            Some(compensate) => compensate(ctx.clone()).await,
            None => Ok(()),
        }
    }
}

/// Calls `invoke`, reporting a panic as a failure of the step.
pub(crate) async fn invoke_guarded<E>(
    handler: &dyn StepHandler<E>,
    ctx: &StepContext,
) -> Result<Value, E>
where
    E: From<StepError>,
{
    AssertUnwindSafe(async { handler.invoke(ctx).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panicked(ctx, HandlerType::Invoke, payload).into()))
}

/// Calls `compensate`, reporting a panic as a failure of the step.
pub(crate) async fn compensate_guarded<E>(
    handler: &dyn StepHandler<E>,
    ctx: &StepContext,
) -> Result<(), E>
where
    E: From<StepError>,
{
    AssertUnwindSafe(async { handler.compensate(ctx).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panicked(ctx, HandlerType::Compensate, payload).into()))
}

fn panicked(ctx: &StepContext, handler: HandlerType, payload: Box<dyn Any + Send>) -> StepError {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(step = %ctx.step_id(), %handler, %reason, "step handler panicked");
    StepError::new(format!("{handler} handler panicked: {reason}")).with_field("panicked", true)
}

/// Per-step flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepFlags {
    /// Leave the step alone during rollback even if it succeeded.
    pub no_compensation: bool,
}

impl StepFlags {
    pub fn no_compensation() -> Self {
        Self {
            no_compensation: true,
        }
    }
}

/// A step declaration: ID, handler, dependencies, flags and retry policy.
pub struct Step<E = StepError> {
    pub(crate) id: StepId,
    pub(crate) handler: Arc<dyn StepHandler<E>>,
    pub(crate) depends_on: Option<Vec<StepId>>,
    pub(crate) flags: StepFlags,
    pub(crate) retry: Arc<dyn RetryPolicy>,
}

impl<E> Step<E> {
    pub fn new(id: impl Into<StepId>, handler: impl StepHandler<E> + 'static) -> Self {
        Self::from_arc(id, Arc::new(handler))
    }

    pub fn from_arc(id: impl Into<StepId>, handler: Arc<dyn StepHandler<E>>) -> Self {
        Self {
            id: id.into(),
            handler,
            depends_on: None,
            flags: StepFlags::default(),
            retry: Arc::new(NoRetry),
        }
    }

    /// Declares explicit dependencies instead of the implicit "after every
    /// step declared so far".
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.depends_on = Some(deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn no_compensation(mut self) -> Self {
        self.flags.no_compensation = true;
        self
    }

    pub fn with_flags(mut self, flags: StepFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Arc::new(policy);
        self
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn flags(&self) -> StepFlags {
        self.flags
    }
}

impl<E> std::fmt::Debug for Step<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .field("flags", &self.flags)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
