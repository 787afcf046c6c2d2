//! Per-run context store.
//!
//! Each step owns one write-once slot, so concurrently running steps never
//! contend: a slot is filled exactly once by the orchestrator when its step
//! succeeds, and readers only ever see fully written values.

use std::collections::HashMap;
use std::sync::OnceLock;

use common::StepId;
use serde_json::{Map, Value};

use crate::error::ContextError;

/// Write-once map from step ID to that step's output, plus read-only seed values.
#[derive(Debug)]
pub struct ContextStore {
    steps: Vec<StepId>,
    index: HashMap<StepId, usize>,
    slots: Vec<OnceLock<Value>>,
    seeds: Map<String, Value>,
}

impl ContextStore {
    pub(crate) fn new(steps: Vec<StepId>, seeds: Map<String, Value>) -> Self {
        let index = steps
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let slots = steps.iter().map(|_| OnceLock::new()).collect();
        Self {
            steps,
            index,
            slots,
            seeds,
        }
    }

    /// Returns the output recorded for a step, or a seed value under `key`.
    ///
    /// Returns `None` if the step has not succeeded (yet) and no seed exists.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.index.get(key) {
            Some(&i) => self.slots[i].get(),
            None => self.seeds.get(key),
        }
    }

    /// Like [`get`](Self::get), but reports a missing key as an error.
    pub fn require(&self, key: &str) -> Result<&Value, ContextError> {
        self.get(key)
            .ok_or_else(|| ContextError::NotFound(key.to_string()))
    }

    /// Returns true if a value is available under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the seed values supplied with the run options.
    pub fn seeds(&self) -> &Map<String, Value> {
        &self.seeds
    }

    /// Returns the number of step outputs recorded so far.
    pub fn recorded(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    /// Collects every recorded step output into a JSON object.
    pub fn outputs(&self) -> Map<String, Value> {
        self.steps
            .iter()
            .zip(&self.slots)
            .filter_map(|(id, slot)| slot.get().map(|v| (id.to_string(), v.clone())))
            .collect()
    }

    /// Records a step output. Fails if the slot has already been written.
    pub(crate) fn write(&self, index: usize, value: Value) -> Result<(), ContextError> {
        self.slots[index]
            .set(value)
            .map_err(|_| ContextError::AlreadyWritten(self.steps[index].clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> ContextStore {
        let mut seeds = Map::new();
        seeds.insert("currency_code".to_string(), json!("usd"));
        ContextStore::new(
            vec![StepId::from("create_cart"), StepId::from("link_payment")],
            seeds,
        )
    }

    #[test]
    fn test_unwritten_step_is_not_found() {
        let ctx = store();
        assert!(ctx.get("create_cart").is_none());
        assert_eq!(
            ctx.require("create_cart"),
            Err(ContextError::NotFound("create_cart".to_string()))
        );
        assert_eq!(ctx.recorded(), 0);
    }

    #[test]
    fn test_write_once() {
        let ctx = store();
        ctx.write(0, json!({ "id": "cart_1" })).unwrap();

        assert_eq!(ctx.get("create_cart"), Some(&json!({ "id": "cart_1" })));
        assert_eq!(
            ctx.write(0, json!({ "id": "cart_2" })),
            Err(ContextError::AlreadyWritten(StepId::from("create_cart")))
        );
        assert_eq!(ctx.get("create_cart"), Some(&json!({ "id": "cart_1" })));
    }

    #[test]
    fn test_seed_values_are_readable() {
        let ctx = store();
        assert_eq!(ctx.get("currency_code"), Some(&json!("usd")));
        assert!(ctx.contains("currency_code"));
        assert!(!ctx.contains("region_id"));
    }

    #[test]
    fn test_outputs_exclude_seeds() {
        let ctx = store();
        ctx.write(1, json!("pay_1")).unwrap();
        ctx.write(0, json!("cart_1")).unwrap();

        let outputs = ctx.outputs();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["create_cart"], json!("cart_1"));
        assert_eq!(outputs["link_payment"], json!("pay_1"));
        assert!(!outputs.contains_key("currency_code"));
    }
}
