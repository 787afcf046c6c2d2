//! Shared identifier types for the saga workflow engine.

pub mod types;

pub use types::{FlowId, StepId};
