//! Saga workflow orchestrator.
//!
//! A [`Workflow`] is a directed acyclic graph of steps. Each step pairs a
//! forward action (`invoke`) with an optional undo (`compensate`). Running
//! a workflow walks the graph forward, invoking independent steps
//! concurrently and recording every output in a write-once context. If any
//! invoke fails, the steps that already succeeded are compensated in
//! reverse completion order.
//!
//! ```text
//! not_started -> invoking -> done
//!                    \-> reverting -> reverted
//!                                 \-> failed
//! ```
//!
//! The engine knows nothing about the domain: handlers are client code,
//! and the error payloads they return are recorded untouched.

mod compensation;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod registry;
pub mod retry;
pub mod state;
pub mod step;
pub mod transaction;

pub use common::{FlowId, StepId};
pub use config::EngineConfig;
pub use context::ContextStore;
pub use error::{ConfigError, ContextError, DefinitionError, ErrorRecord, HandlerType, RunError, StepError};
pub use events::FlowEvent;
pub use executor::{RunOptions, WorkflowRun};
pub use registry::Workflow;
pub use retry::{FixedRetry, NoRetry, RetryPolicy};
pub use state::{FlowState, StepState};
pub use step::{HandlerSet, Step, StepContext, StepFlags, StepHandler};
pub use transaction::Transaction;
