//! Python step handler: invoke a registered action with resolved
//! positional and keyword arguments.

use maverick_types::workflow::StepRecord;
use serde_json::Value;

use super::StepOutcome;
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::expression::ExpressionEvaluator;

impl WorkflowExecutor {
    pub(crate) async fn run_python_step(
        &self,
        step: &StepRecord,
        action_name: &str,
        args: &[Value],
        kwargs: &serde_json::Map<String, Value>,
        ctx: &WorkflowContext,
    ) -> Result<StepOutcome, StepError> {
        let (resolved_args, resolved_kwargs) = {
            let evaluator = ExpressionEvaluator::new(ctx);
            let resolved_args: Vec<Value> = args
                .iter()
                .map(|value| evaluator.resolve_value(value))
                .collect::<Result<_, _>>()?;
            (resolved_args, evaluator.resolve_map(kwargs)?)
        };

        let action = self.registry().actions.get(action_name)?;
        tracing::debug!(
            step = step.name.as_str(),
            action = action_name,
            "invoking action"
        );

        let output = self
            .guarded(action.call(&resolved_args, resolved_kwargs.clone()))
            .await?;
        Ok(StepOutcome::with_inputs(output, resolved_kwargs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::dsl::test_support::{run_workflow, test_registry};
    use serde_json::json;

    #[tokio::test]
    async fn resolves_kwargs_before_invoking() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  n:
    type: integer
    required: true
steps:
  - name: double
    type: python
    action: double
    kwargs:
      n: "${{ inputs.n }}"
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({"n": 21})).await;
        assert!(result.success);
        assert_eq!(result.step("double").unwrap().output, json!(42));
    }

    #[tokio::test]
    async fn action_error_fails_the_step() {
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: boom
    type: python
    action: always_fails
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(!result.success);
        assert_eq!(result.failed_step.as_deref(), Some("boom"));
        assert!(result.step("boom").unwrap().error.is_some());
    }

    #[tokio::test]
    async fn missing_action_fails_at_the_step_in_lenient_mode() {
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: a
    type: python
    action: never_registered
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(!result.success);
        let error = result.step("a").unwrap().error.clone().unwrap();
        assert!(error.contains("never_registered"), "got: {error}");
    }
}
