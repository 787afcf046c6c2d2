//! Step registry: the workflow's step graph and its mutation API.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::StepId;

use crate::config::EngineConfig;
use crate::error::{DefinitionError, StepError};
use crate::retry::RetryPolicy;
use crate::step::{HandlerSet, Step, StepFlags, StepHandler};

pub(crate) struct StepNode<E> {
    pub(crate) id: StepId,
    pub(crate) handler: Arc<dyn StepHandler<E>>,
    pub(crate) depends_on: Vec<usize>,
    pub(crate) flags: StepFlags,
    pub(crate) retry: Arc<dyn RetryPolicy>,
}

/// A workflow definition: a directed acyclic graph of steps.
///
/// A workflow is a plan, not a running instance. It can be run any number
/// of times; it can be mutated with [`append`](Self::append) and
/// [`insert_after`](Self::insert_after) only until its first run starts.
pub struct Workflow<E = StepError> {
    name: String,
    nodes: Vec<StepNode<E>>,
    index: HashMap<StepId, usize>,
    result_step: Option<usize>,
    config: EngineConfig,
    sealed: AtomicBool,
}

impl<E> Workflow<E> {
    /// Creates an empty workflow. Steps are added with [`append`](Self::append).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            result_step: None,
            config: EngineConfig::default(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Builds a workflow from step declarations, in order.
    ///
    /// A step without explicit dependencies runs after every step declared
    /// before it. Explicit dependencies must name steps declared earlier.
    pub fn define(
        name: impl Into<String>,
        steps: impl IntoIterator<Item = Step<E>>,
    ) -> Result<Self, DefinitionError> {
        let mut workflow = Self::new(name);
        for step in steps {
            workflow.append(step)?;
        }
        if workflow.nodes.is_empty() {
            return Err(DefinitionError::Empty(workflow.name));
        }
        Ok(workflow)
    }

    /// Designates the step whose output becomes the run's `result`.
    ///
    /// Without one, the result is the whole context.
    pub fn with_result_step(mut self, id: &str) -> Result<Self, DefinitionError> {
        let index = self.position(id)?;
        self.result_step = Some(index);
        Ok(self)
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Step IDs in declaration order.
    pub fn step_ids(&self) -> Vec<StepId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn result_step(&self) -> Option<&StepId> {
        self.result_step.map(|i| &self.nodes[i].id)
    }

    /// Direct dependencies of a step, in declaration order.
    pub fn dependencies_of(&self, id: &str) -> Option<Vec<StepId>> {
        let node = &self.nodes[*self.index.get(id)?];
        let mut deps = node.depends_on.clone();
        deps.sort_unstable();
        Some(deps.into_iter().map(|i| self.nodes[i].id.clone()).collect())
    }

    /// Steps no other step depends on.
    pub fn terminal_steps(&self) -> Vec<StepId> {
        self.terminal_indices()
            .into_iter()
            .map(|i| self.nodes[i].id.clone())
            .collect()
    }

    /// A topological order of the steps; ties go to the step declared first.
    pub fn execution_order(&self) -> Vec<StepId> {
        self.topological_order()
            .unwrap_or_default()
            .into_iter()
            .map(|i| self.nodes[i].id.clone())
            .collect()
    }

    /// Returns true once the workflow has been run.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Adds a step after every current terminal step, or after its explicit
    /// dependencies if it declares any.
    pub fn append(&mut self, step: Step<E>) -> Result<(), DefinitionError> {
        self.ensure_mutable()?;
        self.ensure_new(&step.id)?;

        let depends_on = match &step.depends_on {
            Some(deps) => self.resolve(deps)?,
            None => self.terminal_indices(),
        };
        self.push(step, depends_on);
        Ok(())
    }

    /// Splices a step in directly after `target`.
    ///
    /// The new step depends on `target` (plus any explicit dependencies it
    /// declares), and every step that depended on `target` depends on the
    /// new step instead. A splice that would create a cycle is rejected and
    /// leaves the workflow unchanged.
    pub fn insert_after(&mut self, step: Step<E>, target: &str) -> Result<(), DefinitionError> {
        self.ensure_mutable()?;
        self.ensure_new(&step.id)?;
        let target = self.position(target)?;

        let mut depends_on = vec![target];
        if let Some(deps) = &step.depends_on {
            for dep in self.resolve(deps)? {
                if !depends_on.contains(&dep) {
                    depends_on.push(dep);
                }
            }
        }

        let new_index = self.nodes.len();
        let successors: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.depends_on.contains(&target))
            .map(|(i, _)| i)
            .collect();

        let id = step.id.clone();
        self.push(step, depends_on);
        for &i in &successors {
            for dep in &mut self.nodes[i].depends_on {
                if *dep == target {
                    *dep = new_index;
                }
            }
        }

        if self.topological_order().is_none() {
            for &i in &successors {
                for dep in &mut self.nodes[i].depends_on {
                    if *dep == new_index {
                        *dep = target;
                    }
                }
            }
            self.nodes.pop();
            self.index.remove(id.as_str());
            return Err(DefinitionError::Cycle(id));
        }

        tracing::debug!(
            workflow = %self.name,
            step = %id,
            after = %self.nodes[target].id,
            "step inserted"
        );
        Ok(())
    }

    /// Appends a step built from a handler set. Boundary name for [`append`](Self::append).
    pub fn add_action(
        &mut self,
        id: impl Into<StepId>,
        handlers: HandlerSet<E>,
        flags: StepFlags,
    ) -> Result<(), DefinitionError>
    where
        E: Send + 'static,
    {
        self.append(Step::new(id, handlers).with_flags(flags))
    }

    /// Inserts a step built from a handler set directly after `target`.
    /// Boundary name for [`insert_after`](Self::insert_after).
    pub fn append_action(
        &mut self,
        id: impl Into<StepId>,
        target: &str,
        handlers: HandlerSet<E>,
    ) -> Result<(), DefinitionError>
    where
        E: Send + 'static,
    {
        self.insert_after(Step::new(id, handlers), target)
    }

    pub(crate) fn nodes(&self) -> &[StepNode<E>] {
        &self.nodes
    }

    pub(crate) fn result_index(&self) -> Option<usize> {
        self.result_step
    }

    /// Freezes the step graph. Returns true if this call sealed it.
    pub(crate) fn seal(&self) -> bool {
        !self.sealed.swap(true, Ordering::AcqRel)
    }

    fn ensure_mutable(&self) -> Result<(), DefinitionError> {
        if self.is_sealed() {
            return Err(DefinitionError::Sealed(self.name.clone()));
        }
        Ok(())
    }

    fn ensure_new(&self, id: &StepId) -> Result<(), DefinitionError> {
        if self.index.contains_key(id.as_str()) {
            return Err(DefinitionError::DuplicateStep(id.clone()));
        }
        Ok(())
    }

    fn position(&self, id: &str) -> Result<usize, DefinitionError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| DefinitionError::UnknownStep(StepId::from(id)))
    }

    fn resolve(&self, deps: &[StepId]) -> Result<Vec<usize>, DefinitionError> {
        let mut resolved = Vec::with_capacity(deps.len());
        for dep in deps {
            let i = self.position(dep.as_str())?;
            if !resolved.contains(&i) {
                resolved.push(i);
            }
        }
        Ok(resolved)
    }

    fn push(&mut self, step: Step<E>, depends_on: Vec<usize>) {
        self.index.insert(step.id.clone(), self.nodes.len());
        self.nodes.push(StepNode {
            id: step.id,
            handler: step.handler,
            depends_on,
            flags: step.flags,
            retry: step.retry,
        });
    }

    fn terminal_indices(&self) -> Vec<usize> {
        let mut has_successor = vec![false; self.nodes.len()];
        for node in &self.nodes {
            for &dep in &node.depends_on {
                has_successor[dep] = true;
            }
        }
        (0..self.nodes.len()).filter(|&i| !has_successor[i]).collect()
    }

    /// Kahn's algorithm with declaration order as the tie-breaker.
    /// Returns `None` if the graph has a cycle.
    fn topological_order(&self) -> Option<Vec<usize>> {
        let n = self.nodes.len();
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, node) in self.nodes.iter().enumerate() {
            for &dep in &node.depends_on {
                dependents[dep].push(i);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        (order.len() == n).then_some(order)
    }
}

impl<E> std::fmt::Debug for Workflow<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.step_ids())
            .field("result_step", &self.result_step())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn noop() -> HandlerSet {
        HandlerSet::new(|_| async { Ok(Value::Null) })
    }

    fn step(id: &str) -> Step {
        Step::new(id, noop())
    }

    fn ids(list: &[&str]) -> Vec<StepId> {
        list.iter().map(|s| StepId::from(*s)).collect()
    }

    #[test]
    fn test_sequential_definition() {
        let wf = Workflow::define("seq", [step("a"), step("b"), step("c")]).unwrap();
        assert_eq!(wf.execution_order(), ids(&["a", "b", "c"]));
        assert_eq!(wf.dependencies_of("a"), Some(vec![]));
        assert_eq!(wf.dependencies_of("b"), Some(ids(&["a"])));
        assert_eq!(wf.dependencies_of("c"), Some(ids(&["b"])));
        assert_eq!(wf.terminal_steps(), ids(&["c"]));
    }

    #[test]
    fn test_fan_out_fan_in() {
        let wf = Workflow::define(
            "fan",
            [
                step("root"),
                step("left").depends_on(["root"]),
                step("right").depends_on(["root"]),
                step("join"),
            ],
        )
        .unwrap();

        assert_eq!(wf.dependencies_of("join"), Some(ids(&["left", "right"])));
        assert_eq!(wf.execution_order(), ids(&["root", "left", "right", "join"]));
    }

    #[test]
    fn test_empty_definition_rejected() {
        let err = Workflow::<StepError>::define("empty", []).unwrap_err();
        assert_eq!(err, DefinitionError::Empty("empty".to_string()));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Workflow::define("dup", [step("a"), step("a")]).unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateStep(StepId::from("a")));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = Workflow::define("bad", [step("a"), step("b").depends_on(["zzz"])]).unwrap_err();
        assert_eq!(err, DefinitionError::UnknownStep(StepId::from("zzz")));
    }

    #[test]
    fn test_unknown_result_step_rejected() {
        let err = Workflow::define("r", [step("a")])
            .unwrap()
            .with_result_step("b")
            .unwrap_err();
        assert_eq!(err, DefinitionError::UnknownStep(StepId::from("b")));
    }

    #[test]
    fn test_append_depends_on_terminals() {
        let mut wf = Workflow::define("m", [step("a"), step("b")]).unwrap();
        wf.append(step("x")).unwrap();

        assert_eq!(wf.dependencies_of("x"), Some(ids(&["b"])));
        assert_eq!(wf.execution_order(), ids(&["a", "b", "x"]));
    }

    #[test]
    fn test_append_after_fan_out_waits_for_every_branch() {
        let mut wf = Workflow::define(
            "m",
            [step("a"), step("b").depends_on(["a"]), step("c").depends_on(["a"])],
        )
        .unwrap();
        wf.append(step("x")).unwrap();
        assert_eq!(wf.dependencies_of("x"), Some(ids(&["b", "c"])));
    }

    #[test]
    fn test_insert_after_splices() {
        let mut wf = Workflow::define("m", [step("a"), step("b")]).unwrap();
        wf.insert_after(step("y"), "a").unwrap();

        assert_eq!(wf.dependencies_of("y"), Some(ids(&["a"])));
        assert_eq!(wf.dependencies_of("b"), Some(ids(&["y"])));
        assert_eq!(wf.execution_order(), ids(&["a", "y", "b"]));
    }

    #[test]
    fn test_insert_after_terminal_step() {
        let mut wf = Workflow::define("m", [step("a"), step("b")]).unwrap();
        wf.insert_after(step("y"), "b").unwrap();
        assert_eq!(wf.terminal_steps(), ids(&["y"]));
        assert_eq!(wf.execution_order(), ids(&["a", "b", "y"]));
    }

    #[test]
    fn test_insert_after_unknown_target() {
        let mut wf = Workflow::define("m", [step("a")]).unwrap();
        let err = wf.insert_after(step("y"), "nope").unwrap_err();
        assert_eq!(err, DefinitionError::UnknownStep(StepId::from("nope")));
        assert!(!wf.contains("y"));
    }

    #[test]
    fn test_insert_after_rejects_cycle_and_rolls_back() {
        let mut wf = Workflow::define("m", [step("a"), step("b"), step("c")]).unwrap();
        let err = wf
            .insert_after(step("y").depends_on(["c"]), "a")
            .unwrap_err();

        assert_eq!(err, DefinitionError::Cycle(StepId::from("y")));
        assert!(!wf.contains("y"));
        assert_eq!(wf.len(), 3);
        assert_eq!(wf.dependencies_of("b"), Some(ids(&["a"])));
        assert_eq!(wf.execution_order(), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_mutation_rejected_once_sealed() {
        let mut wf = Workflow::define("m", [step("a")]).unwrap();
        assert!(wf.seal());
        assert!(!wf.seal());

        assert_eq!(
            wf.append(step("x")).unwrap_err(),
            DefinitionError::Sealed("m".to_string())
        );
        assert_eq!(
            wf.insert_after(step("y"), "a").unwrap_err(),
            DefinitionError::Sealed("m".to_string())
        );
    }

    #[test]
    fn test_add_action_and_append_action() {
        let mut wf = Workflow::define("m", [step("a"), step("b")]).unwrap();
        wf.add_action("validate", noop(), StepFlags::no_compensation())
            .unwrap();
        wf.append_action("throw", "a", noop()).unwrap();

        assert_eq!(wf.execution_order(), ids(&["a", "throw", "b", "validate"]));
        assert!(wf.nodes()[2].flags.no_compensation);
    }
}
