//! Typed access to step inputs and recorded outputs.

use saga::{StepContext, StepError};
use serde::de::DeserializeOwned;

/// The workflow input as `T`.
pub(crate) fn input<T: DeserializeOwned>(ctx: &StepContext) -> Result<T, StepError> {
    Ok(serde_json::from_value(ctx.input().clone())?)
}

/// Another step's recorded output as `T`.
pub(crate) fn read<T: DeserializeOwned>(ctx: &StepContext, step: &str) -> Result<T, StepError> {
    Ok(serde_json::from_value(ctx.require(step)?.clone())?)
}

/// This step's own recorded output as `T`. `None` if it never succeeded.
pub(crate) fn recorded<T: DeserializeOwned>(ctx: &StepContext) -> Result<Option<T>, StepError> {
    ctx.output()
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(StepError::from)
}
