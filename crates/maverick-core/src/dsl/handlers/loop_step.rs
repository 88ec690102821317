//! Loop step handler: finite `for_each` iteration or `until` repetition.
//!
//! A `for_each` loop runs its body once per item, sequentially by default
//! or fanned out when `parallel: true`. An `until` loop is always
//! sequential: the body runs, the condition is evaluated, and the loop
//! exits on truthy or fails on reaching `max_iterations`. Sequential
//! bodies run against the live context, so later steps (and the `until`
//! condition) observe the body's stored outputs.

use maverick_types::event::ProgressEvent;
use maverick_types::workflow::StepRecord;
use serde_json::{json, Value};

use super::{step_result_to_value, StepOutcome};
use crate::dsl::context::{IterationFrame, WorkflowContext};
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::expression::ExpressionEvaluator;
use crate::dsl::streaming::{prefix_callback, EventCallback};

impl WorkflowExecutor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_loop_step(
        &self,
        step: &StepRecord,
        for_each: Option<&str>,
        until: Option<&str>,
        max_iterations: u32,
        parallel: bool,
        nested: &[StepRecord],
        ctx: &mut WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        if let Some(expression) = for_each {
            return self
                .run_for_each_loop(step, expression, parallel, nested, ctx, callback)
                .await;
        }
        let until = until.expect("parser guarantees for_each or until");
        self.run_until_loop(step, until, max_iterations, nested, ctx, callback)
            .await
    }

    async fn run_for_each_loop(
        &self,
        step: &StepRecord,
        expression: &str,
        parallel: bool,
        nested: &[StepRecord],
        ctx: &mut WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let items = self.evaluate_for_each(expression, ctx)?;
        let total = items.len();

        if parallel {
            let results = self
                .run_items_parallel(step, nested, items, ctx, callback)
                .await?;
            return Ok(StepOutcome::new(json!({
                "results": results,
                "iterations": total,
                "completed": true,
            })));
        }

        let mut results = Vec::with_capacity(total);
        for (index, item) in items.into_iter().enumerate() {
            if self.cancellation_token().is_cancelled() {
                ctx.iteration = None;
                return Err(StepError::Cancelled);
            }

            let iteration_path = format!("{}/[{index}]", step.name);
            callback(ProgressEvent::LoopIterationStarted {
                step_name: step.name.clone(),
                index,
                total: Some(total),
                step_path: iteration_path.clone(),
            });

            let iteration_callback = prefix_callback(iteration_path.clone(), callback.clone());
            ctx.iteration = Some(IterationFrame { item, index });

            let mut outputs = Vec::with_capacity(nested.len());
            let mut iteration_error: Option<String> = None;
            for child in nested {
                let outcome = self.run_step(child, ctx, &iteration_callback).await;
                if let Some(result) = &outcome {
                    if !result.success && !child.continue_on_error {
                        iteration_error = Some(format!(
                            "step '{}': {}",
                            child.name,
                            result.error.clone().unwrap_or_default()
                        ));
                    }
                }
                outputs.push(step_result_to_value(outcome));
                if iteration_error.is_some() {
                    break;
                }
            }
            ctx.iteration = None;

            callback(ProgressEvent::LoopIterationCompleted {
                step_name: step.name.clone(),
                index,
                step_path: iteration_path,
            });
            results.push(Value::Array(outputs));

            if let Some(error) = iteration_error {
                if step.continue_on_error {
                    tracing::warn!(
                        step = step.name.as_str(),
                        index,
                        error = error.as_str(),
                        "iteration failed; continuing with remaining items"
                    );
                } else {
                    return Err(StepError::Execution(format!(
                        "iteration {index} failed at {error}"
                    )));
                }
            }
        }

        Ok(StepOutcome::new(json!({
            "results": results,
            "iterations": total,
            "completed": true,
        })))
    }

    async fn run_until_loop(
        &self,
        step: &StepRecord,
        until: &str,
        max_iterations: u32,
        nested: &[StepRecord],
        ctx: &mut WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let mut iterations = 0u32;
        loop {
            if iterations >= max_iterations {
                return Err(StepError::LoopLimitReached(max_iterations));
            }
            if self.cancellation_token().is_cancelled() {
                return Err(StepError::Cancelled);
            }

            let index = iterations as usize;
            let iteration_path = format!("{}/[{index}]", step.name);
            callback(ProgressEvent::LoopIterationStarted {
                step_name: step.name.clone(),
                index,
                total: None,
                step_path: iteration_path.clone(),
            });

            let iteration_callback = prefix_callback(iteration_path.clone(), callback.clone());
            ctx.iteration = Some(IterationFrame {
                item: Value::Null,
                index,
            });

            for child in nested {
                let outcome = self.run_step(child, ctx, &iteration_callback).await;
                if let Some(result) = outcome {
                    if !result.success && !child.continue_on_error {
                        ctx.iteration = None;
                        callback(ProgressEvent::LoopIterationCompleted {
                            step_name: step.name.clone(),
                            index,
                            step_path: iteration_path,
                        });
                        return Err(StepError::Execution(format!(
                            "iteration {index} failed at step '{}': {}",
                            child.name,
                            result.error.unwrap_or_default()
                        )));
                    }
                }
            }
            ctx.iteration = None;

            callback(ProgressEvent::LoopIterationCompleted {
                step_name: step.name.clone(),
                index,
                step_path: iteration_path,
            });
            iterations += 1;

            // Condition is evaluated after each iteration, against the
            // body's freshly stored outputs
            if ExpressionEvaluator::new(ctx).evaluate_condition(until)? {
                return Ok(StepOutcome::new(json!({
                    "iterations": iterations,
                    "completed": true,
                })));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::dsl::test_support::{run_workflow, test_registry};
    use maverick_types::event::ProgressEvent;
    use serde_json::json;

    #[tokio::test]
    async fn sequential_for_each_runs_in_order() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  items:
    type: array
    required: true
steps:
  - name: my_loop
    type: loop
    for_each: "${{ inputs.items }}"
    steps:
      - name: double
        type: python
        action: double
        kwargs:
          n: "${{ item }}"
"#;
        let (result, events) =
            run_workflow(yaml, test_registry(), json!({"items": [5, 6]})).await;
        assert!(result.success);
        let output = &result.step("my_loop").unwrap().output;
        assert_eq!(output["results"], json!([[10], [12]]));
        assert_eq!(output["iterations"], json!(2));

        // Nested step events carry the iteration in their path
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::StepCompleted { step_path, .. } if step_path == "my_loop/[1]/double"
        )));
    }

    #[tokio::test]
    async fn parallel_for_each_loop_matches_parallel_semantics() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  items:
    type: array
    required: true
steps:
  - name: my_loop
    type: loop
    for_each: "${{ inputs.items }}"
    parallel: true
    steps:
      - name: double
        type: python
        action: double
        kwargs:
          n: "${{ item }}"
"#;
        let (result, _) =
            run_workflow(yaml, test_registry(), json!({"items": [1, 2, 3]})).await;
        assert!(result.success);
        assert_eq!(
            result.step("my_loop").unwrap().output["results"],
            json!([[2], [4], [6]])
        );
    }

    #[tokio::test]
    async fn until_loop_stops_when_condition_holds() {
        // `countdown_done` returns {done:false} twice, then {done:true}
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: my_loop
    type: loop
    until: "${{ steps.check.output.done }}"
    max_iterations: 5
    steps:
      - name: work
        type: python
        action: noop
      - name: check
        type: python
        action: countdown_done
"#;
        let (result, events) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(result.success, "error: {:?}", result.step("my_loop").unwrap().error);
        let output = &result.step("my_loop").unwrap().output;
        assert_eq!(output["iterations"], json!(3));
        assert_eq!(output["completed"], json!(true));

        let iteration_count = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::LoopIterationStarted { .. }))
            .count();
        assert_eq!(iteration_count, 3);
    }

    #[tokio::test]
    async fn until_true_with_single_iteration_cap_runs_once() {
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: my_loop
    type: loop
    until: "${{ steps.check.output.done }}"
    max_iterations: 1
    steps:
      - name: check
        type: python
        action: echo
        kwargs:
          done: true
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(result.success);
        assert_eq!(result.step("my_loop").unwrap().output["iterations"], json!(1));
    }

    #[tokio::test]
    async fn hitting_the_iteration_cap_is_a_failure() {
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: my_loop
    type: loop
    until: "${{ steps.check.output.done }}"
    max_iterations: 2
    steps:
      - name: check
        type: python
        action: echo
        kwargs:
          done: false
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(!result.success);
        let error = result.step("my_loop").unwrap().error.clone().unwrap();
        assert!(error.contains("max_iterations"), "got: {error}");
    }

    #[tokio::test]
    async fn body_failure_fails_the_loop() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  items:
    type: array
    required: true
steps:
  - name: my_loop
    type: loop
    for_each: "${{ inputs.items }}"
    steps:
      - name: bad
        type: python
        action: always_fails
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({"items": [1]})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn continue_on_error_keeps_iterating() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  items:
    type: array
    required: true
steps:
  - name: my_loop
    type: loop
    for_each: "${{ inputs.items }}"
    continue_on_error: true
    steps:
      - name: bad
        type: python
        action: always_fails
  - name: after
    type: python
    action: echo
    kwargs:
      reached: true
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({"items": [1, 2]})).await;
        // Both iterations ran despite failures, and the workflow continued
        assert!(result.success);
        assert_eq!(
            result.step("my_loop").unwrap().output["iterations"],
            json!(2)
        );
        assert_eq!(result.step("after").unwrap().output["reached"], json!(true));
    }
}
