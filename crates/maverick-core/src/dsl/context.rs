//! Workflow execution context: the executor-owned per-run state.
//!
//! The context holds the frozen run inputs, step results keyed by name,
//! the current iteration frame, and the LIFO list of pending rollback
//! registrations. Handlers see a read-only view; the executor performs the
//! only mutations (storing results, registering rollbacks) between handler
//! invocations.
//!
//! Cloning the context produces an independent snapshot of inputs and
//! results (used by concurrent iteration tasks) that still shares the
//! rollback list, so compensations registered inside a fan-out survive the
//! task's snapshot being dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use maverick_types::checkpoint::StepResultRecord;
use maverick_types::result::StepResult;
use maverick_types::workflow::StepType;
use serde_json::Value;
use uuid::Uuid;

use super::registry::Action;

/// The current `for_each` / loop frame: `item` and `index` references
/// resolve against this.
#[derive(Debug, Clone)]
pub struct IterationFrame {
    pub item: Value,
    pub index: usize,
}

/// A registered compensation for a completed step.
pub struct RollbackRegistration {
    pub step_name: String,
    pub action: Arc<dyn Action>,
    /// Keyword arguments the compensation is invoked with (the resolved
    /// inputs of the step it compensates).
    pub kwargs: serde_json::Map<String, Value>,
}

impl std::fmt::Debug for RollbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackRegistration")
            .field("step_name", &self.step_name)
            .finish()
    }
}

/// Mutable per-run state owned by the executor.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub workflow_name: String,
    pub run_id: Uuid,
    inputs: serde_json::Map<String, Value>,
    results: HashMap<String, StepResult>,
    /// Step names in completion order (no duplicates on re-execution).
    order: Vec<String>,
    pub iteration: Option<IterationFrame>,
    rollbacks: Arc<Mutex<Vec<RollbackRegistration>>>,
}

impl WorkflowContext {
    pub fn new(
        workflow_name: impl Into<String>,
        run_id: Uuid,
        inputs: serde_json::Map<String, Value>,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            run_id,
            inputs,
            results: HashMap::new(),
            order: Vec::new(),
            iteration: None,
            rollbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The frozen run inputs.
    pub fn inputs(&self) -> &serde_json::Map<String, Value> {
        &self.inputs
    }

    /// Record a step result under its name.
    ///
    /// Re-executions (loop iterations re-running their body) overwrite the
    /// previous entry; the completion order keeps the first position.
    pub fn store_result(&mut self, result: StepResult) {
        if !self.results.contains_key(&result.name) {
            self.order.push(result.name.clone());
        }
        self.results.insert(result.name.clone(), result);
    }

    pub fn result(&self, name: &str) -> Option<&StepResult> {
        self.results.get(name)
    }

    /// The stored output of a completed step.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.results.get(name).map(|r| &r.output)
    }

    /// Names of completed steps, sorted (for diagnostics).
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.results.keys().cloned().collect();
        names.sort();
        names
    }

    /// Step results in completion order.
    pub fn results_in_order(&self) -> Vec<StepResult> {
        self.order
            .iter()
            .filter_map(|name| self.results.get(name).cloned())
            .collect()
    }

    /// Restore results from a checkpoint snapshot.
    pub fn seed(&mut self, records: &[StepResultRecord]) {
        for record in records {
            self.store_result(StepResult {
                name: record.name.clone(),
                step_type: StepType::Python,
                success: true,
                output: record.output.clone(),
                duration_ms: 0,
                error: None,
            });
        }
    }

    /// A snapshot of this context carrying an iteration frame.
    pub fn with_iteration(&self, item: Value, index: usize) -> Self {
        let mut clone = self.clone();
        clone.iteration = Some(IterationFrame { item, index });
        clone
    }

    /// Register a compensation to run if a later step fails.
    pub fn register_rollback(&self, registration: RollbackRegistration) {
        tracing::debug!(
            step = registration.step_name.as_str(),
            "registered rollback"
        );
        self.rollbacks
            .lock()
            .expect("rollback list poisoned")
            .push(registration);
    }

    /// Number of pending compensations.
    pub fn pending_rollback_count(&self) -> usize {
        self.rollbacks.lock().expect("rollback list poisoned").len()
    }

    /// Remove and return all pending compensations in registration order.
    ///
    /// The failure path iterates the returned list in reverse (LIFO).
    pub fn drain_rollbacks(&self) -> Vec<RollbackRegistration> {
        std::mem::take(&mut *self.rollbacks.lock().expect("rollback list poisoned"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::registry::FnAction;
    use serde_json::json;

    fn test_context() -> WorkflowContext {
        let mut inputs = serde_json::Map::new();
        inputs.insert("branch".to_string(), json!("001-x"));
        WorkflowContext::new("feature-build", Uuid::now_v7(), inputs)
    }

    fn result(name: &str, output: Value) -> StepResult {
        StepResult::success(name, StepType::Python, output, 1)
    }

    #[test]
    fn stores_and_reads_outputs() {
        let mut ctx = test_context();
        ctx.store_result(result("init", json!({"ok": true})));

        assert_eq!(ctx.output("init"), Some(&json!({"ok": true})));
        assert_eq!(ctx.output("missing"), None);
        assert_eq!(ctx.inputs()["branch"], json!("001-x"));
    }

    #[test]
    fn completion_order_is_preserved() {
        let mut ctx = test_context();
        ctx.store_result(result("a", json!(1)));
        ctx.store_result(result("b", json!(2)));
        ctx.store_result(result("c", json!(3)));

        let ordered: Vec<String> = ctx
            .results_in_order()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }

    #[test]
    fn re_execution_overwrites_but_keeps_position() {
        let mut ctx = test_context();
        ctx.store_result(result("check", json!({"done": false})));
        ctx.store_result(result("other", json!(1)));
        ctx.store_result(result("check", json!({"done": true})));

        assert_eq!(ctx.output("check"), Some(&json!({"done": true})));
        let ordered: Vec<String> = ctx
            .results_in_order()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(ordered, vec!["check", "other"]);
    }

    #[test]
    fn seed_restores_checkpoint_records() {
        let mut ctx = test_context();
        ctx.seed(&[
            StepResultRecord {
                name: "a".to_string(),
                output: json!(1),
            },
            StepResultRecord {
                name: "b".to_string(),
                output: json!(2),
            },
        ]);
        assert_eq!(ctx.output("a"), Some(&json!(1)));
        assert!(ctx.result("b").unwrap().success);
    }

    #[test]
    fn iteration_snapshot_is_independent() {
        let mut ctx = test_context();
        ctx.store_result(result("a", json!(1)));

        let mut snapshot = ctx.with_iteration(json!("x"), 2);
        assert_eq!(snapshot.iteration.as_ref().unwrap().index, 2);
        snapshot.store_result(result("inner", json!(9)));

        // Parent does not see the snapshot's results
        assert!(ctx.output("inner").is_none());
        assert!(ctx.iteration.is_none());
    }

    #[test]
    fn rollbacks_are_shared_across_snapshots() {
        let ctx = test_context();
        let snapshot = ctx.with_iteration(json!(0), 0);

        snapshot.register_rollback(RollbackRegistration {
            step_name: "inner".to_string(),
            action: Arc::new(FnAction::new(|_, _| Ok(Value::Null))),
            kwargs: serde_json::Map::new(),
        });

        // Registration made through the snapshot is visible to the parent
        assert_eq!(ctx.pending_rollback_count(), 1);
        let drained = ctx.drain_rollbacks();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].step_name, "inner");
        assert_eq!(ctx.pending_rollback_count(), 0);
    }
}
