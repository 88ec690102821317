//! Parallel step handler: structured concurrency over nested steps.
//!
//! With `for_each`, the resolved sequence fans out to one independent
//! task per item, each running the full nested step list over its own
//! context snapshot. Without it, each nested step runs as its own task.
//! Result slots are pre-allocated and each task writes at its own index,
//! so the output order always matches the input order regardless of
//! completion order. A failing task contributes an error entry to the
//! result list; siblings keep running.

use maverick_types::event::ProgressEvent;
use maverick_types::workflow::StepRecord;
use serde_json::{json, Value};
use tokio::task::JoinSet;

use super::{step_result_to_value, StepOutcome};
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::streaming::{prefix_callback, EventCallback};

impl WorkflowExecutor {
    pub(crate) async fn run_parallel_step(
        &self,
        step: &StepRecord,
        nested: &[StepRecord],
        for_each: Option<&str>,
        ctx: &WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let results = match for_each {
            Some(expression) => {
                let items = self.evaluate_for_each(expression, ctx)?;
                self.run_items_parallel(step, nested, items, ctx, callback)
                    .await?
            }
            None => self.run_steps_parallel(step, nested, ctx, callback).await?,
        };
        Ok(StepOutcome::new(json!({ "results": results })))
    }

    /// One task per nested step, each over a snapshot of the context.
    async fn run_steps_parallel(
        &self,
        step: &StepRecord,
        nested: &[StepRecord],
        ctx: &WorkflowContext,
        callback: &EventCallback,
    ) -> Result<Vec<Value>, StepError> {
        if nested.is_empty() {
            return Ok(Vec::new());
        }

        let mut join_set = JoinSet::new();
        for (index, child) in nested.iter().enumerate() {
            let executor = self.clone();
            let child = child.clone();
            let mut snapshot = ctx.clone();
            let child_callback = prefix_callback(step.name.clone(), callback.clone());
            join_set.spawn(async move {
                let outcome = executor.run_step(&child, &mut snapshot, &child_callback).await;
                (index, step_result_to_value(outcome))
            });
        }

        let mut results = vec![Value::Null; nested.len()];
        while let Some(joined) = join_set.join_next().await {
            let (index, value) =
                joined.map_err(|e| StepError::Execution(format!("task join error: {e}")))?;
            results[index] = value;
        }
        Ok(results)
    }

    /// One task per item, each running the nested steps in order over a
    /// snapshot carrying that item's iteration frame. Shared by parallel
    /// `for_each` steps and `parallel: true` loops.
    pub(crate) async fn run_items_parallel(
        &self,
        step: &StepRecord,
        nested: &[StepRecord],
        items: Vec<Value>,
        ctx: &WorkflowContext,
        callback: &EventCallback,
    ) -> Result<Vec<Value>, StepError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let total = items.len();
        let mut join_set = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let executor = self.clone();
            let nested: Vec<StepRecord> = nested.to_vec();
            let mut snapshot = ctx.with_iteration(item, index);
            let step_name = step.name.clone();
            let callback = callback.clone();
            join_set.spawn(async move {
                let iteration_path = format!("{step_name}/[{index}]");
                callback(ProgressEvent::LoopIterationStarted {
                    step_name: step_name.clone(),
                    index,
                    total: Some(total),
                    step_path: iteration_path.clone(),
                });

                let iteration_callback =
                    prefix_callback(iteration_path.clone(), callback.clone());
                let mut outputs = Vec::with_capacity(nested.len());
                for child in &nested {
                    let outcome = executor
                        .run_step(child, &mut snapshot, &iteration_callback)
                        .await;
                    let failed = matches!(
                        &outcome,
                        Some(result) if !result.success && !child.continue_on_error
                    );
                    outputs.push(step_result_to_value(outcome));
                    if failed {
                        break;
                    }
                }

                callback(ProgressEvent::LoopIterationCompleted {
                    step_name: step_name.clone(),
                    index,
                    step_path: iteration_path,
                });
                (index, Value::Array(outputs))
            });
        }

        let mut results = vec![Value::Null; total];
        while let Some(joined) = join_set.join_next().await {
            let (index, value) =
                joined.map_err(|e| StepError::Execution(format!("task join error: {e}")))?;
            results[index] = value;
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
