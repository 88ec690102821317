//! Generate step handler: run a registered text generator.

use maverick_types::workflow::{ContextSpec, StepRecord};
use serde_json::Value;

use super::StepOutcome;
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::streaming::EventCallback;

impl WorkflowExecutor {
    pub(crate) async fn run_generate_step(
        &self,
        step: &StepRecord,
        generator_name: &str,
        context_spec: &ContextSpec,
        ctx: &WorkflowContext,
        _callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let factory = self.registry().generators.get(generator_name)?;

        let (generator_context, resolved_inputs) =
            self.build_collaborator_context(context_spec, ctx).await?;

        let generator = factory.create();
        tracing::debug!(
            step = step.name.as_str(),
            generator = generator_name,
            "running generator"
        );

        let text = self.guarded(generator.generate(generator_context)).await?;
        Ok(StepOutcome::with_inputs(Value::String(text), resolved_inputs))
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
    async fn generator_output_is_a_string() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  branch:
    type: string
    required: true
steps:
  - name: commit_message
    type: generate
    generator: commit_title
    context:
      branch: "${{ inputs.branch }}"
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({"branch": "001-x"})).await;
        assert!(result.success);
        assert_eq!(
            result.step("commit_message").unwrap().output,
            json!("generated for 001-x")
        );
    }

    #[tokio::test]
    async fn missing_generator_is_a_step_failure() {
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: g
    type: generate
    generator: nope
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(!result.success);
        assert!(result.step("g").unwrap().error.clone().unwrap().contains("nope"));
    }
}
