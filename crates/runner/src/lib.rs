//! Demo runner for the saga orchestrator.
//!
//! Builds one of the bundled workflows against seeded in-memory services,
//! optionally splices a failing step in to exercise rollback, and runs it
//! once with the engine settings from the environment.

pub mod config;
pub mod error;

use std::sync::Arc;

use saga::{HandlerSet, RunOptions, StepError, Workflow, WorkflowRun};
use serde_json::{Value, json};
use workflows::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService,
    InMemoryStoreService, create_cart_workflow, order_fulfillment_workflow,
};

pub use config::{Config, LogFormat, WorkflowKind};
pub use error::{Result, RunnerError};

/// Id of the step spliced in by `RUNNER_FAIL_AFTER`.
pub const INJECTED_STEP_ID: &str = "injected_failure";

/// Builds the configured workflow and its default input.
pub fn build(config: &Config) -> Result<(Workflow, Value)> {
    let (workflow, input) = match config.workflow {
        WorkflowKind::Order => order_demo()?,
        WorkflowKind::Cart => cart_demo()?,
    };
    let mut workflow = workflow.with_config(config.engine.clone());

    if let Some(target) = &config.fail_after {
        let message = format!("Injected failure after {target}");
        let failing: HandlerSet = HandlerSet::new(move |_| {
            let message = message.clone();
            async move { Err(StepError::new(message)) }
        });
        workflow.append_action(INJECTED_STEP_ID, target, failing)?;
        tracing::info!(after = %target, "failure injected");
    }

    Ok((workflow, config.input.clone().unwrap_or(input)))
}

/// Builds and runs the configured workflow once.
///
/// A run that ends `reverted` or `failed` is returned as
/// [`RunError::Failed`](saga::RunError::Failed) when the engine throws on error.
pub async fn execute(config: &Config) -> Result<WorkflowRun<StepError>> {
    let (workflow, input) = build(config)?;
    tracing::info!(workflow = %workflow.name(), steps = workflow.len(), "running workflow");
    Ok(workflow.run(RunOptions::new(input)).await?)
}

fn order_demo() -> Result<(Workflow, Value)> {
    let inventory = InMemoryInventoryService::new();
    inventory.set_stock("SKU-001", 10);
    inventory.set_stock("SKU-002", 5);

    let workflow = order_fulfillment_workflow(
        inventory,
        InMemoryPaymentService::new(),
        InMemoryShippingService::new(),
    )?;
    let input = json!({
        "order_id": "ord_demo",
        "customer_id": "cus_demo",
        "amount_cents": 4500,
        "items": [
            { "sku": "SKU-001", "quantity": 2 },
            { "sku": "SKU-002", "quantity": 1 }
        ]
    });
    Ok((workflow, input))
}

fn cart_demo() -> Result<(Workflow, Value)> {
    let store = InMemoryStoreService::new();
    store.add_region("United States", "usd");
    let channel = store.add_sales_channel("Webshop", false);
    store.set_default_sales_channel(&channel.id);
    store.set_price("variant_tee", "usd", 2500);
    store.set_price("variant_mug", "usd", 1200);

    let workflow = create_cart_workflow(Arc::new(store))?;
    let input = json!({
        "email": "demo@example.com",
        "items": [
            { "variant_id": "variant_tee", "quantity": 2 },
            { "variant_id": "variant_mug", "quantity": 1 }
        ]
    });
    Ok((workflow, input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_order_demo() {
        let (workflow, input) = build(&Config::default()).unwrap();
        assert_eq!(workflow.name(), "order_fulfillment");
        assert_eq!(input["order_id"], "ord_demo");
    }

    #[test]
    fn test_fail_after_splices_step() {
        let config = Config {
            workflow: WorkflowKind::Cart,
            fail_after: Some("create-cart".to_string()),
            ..Config::default()
        };
        let (workflow, _) = build(&config).unwrap();

        let order = workflow.execution_order();
        let cart = order.iter().position(|id| id == "create-cart").unwrap();
        assert_eq!(order[cart + 1], INJECTED_STEP_ID);
    }

    #[test]
    fn test_fail_after_unknown_step_is_definition_error() {
        let config = Config {
            fail_after: Some("nope".to_string()),
            ..Config::default()
        };
        assert!(matches!(build(&config), Err(RunnerError::Definition(_))));
    }

    #[test]
    fn test_input_override() {
        let config = Config {
            input: Some(json!({ "order_id": "ord_custom" })),
            ..Config::default()
        };
        let (_, input) = build(&config).unwrap();
        assert_eq!(input["order_id"], "ord_custom");
    }
}
