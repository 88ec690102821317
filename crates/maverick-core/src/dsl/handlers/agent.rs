//! Agent step handler: build the context, construct the agent, execute.
//!
//! The step's `context` is either an inline map (values resolved against
//! the live context) or the name of a registered context builder. A
//! context destined for a known typed agent (currently `implementer`) is
//! shaped into its structured form before dispatch.

use maverick_types::agent::ImplementerContext;
use maverick_types::workflow::{ContextSpec, StepRecord};
use serde_json::Value;

use super::StepOutcome;
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::expression::ExpressionEvaluator;
use crate::dsl::streaming::{EventCallback, StreamingContext};

impl WorkflowExecutor {
    pub(crate) async fn run_agent_step(
        &self,
        step: &StepRecord,
        agent_name: &str,
        context_spec: &ContextSpec,
        ctx: &WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let factory = self.registry().agents.get(agent_name)?;

        let (agent_context, resolved_inputs) =
            self.build_collaborator_context(context_spec, ctx).await?;
        let agent_context = shape_agent_context(agent_name, agent_context)?;

        let agent = factory.create();
        let stream = StreamingContext::new(Some(callback.clone()), &step.name, agent_name);
        tracing::debug!(
            step = step.name.as_str(),
            agent = agent_name,
            "executing agent"
        );

        let output = self.guarded(agent.execute(agent_context, Some(stream))).await?;
        Ok(StepOutcome::with_inputs(output, resolved_inputs))
    }

    /// Resolve a context spec into the value handed to an agent or
    /// generator, plus the resolved inline inputs when present.
    pub(crate) async fn build_collaborator_context(
        &self,
        spec: &ContextSpec,
        ctx: &WorkflowContext,
    ) -> Result<(Value, serde_json::Map<String, Value>), StepError> {
        match spec {
            ContextSpec::Inline(map) => {
                let resolved = ExpressionEvaluator::new(ctx).resolve_map(map)?;
                Ok((Value::Object(resolved.clone()), resolved))
            }
            ContextSpec::Builder(name) => {
                let builder = self.registry().context_builders.get(name)?;
                let empty = serde_json::Map::new();
                let built = self.guarded(builder.build(&empty, ctx)).await?;
                Ok((built, serde_json::Map::new()))
            }
        }
    }
}

/// Shape a loose context map into the structured form a typed agent
/// expects. Unknown agents receive the value untouched.
fn shape_agent_context(agent_name: &str, context: Value) -> Result<Value, StepError> {
    if agent_name == "implementer" && context.is_object() {
        let typed: ImplementerContext = serde_json::from_value(context).map_err(|e| {
            StepError::Execution(format!("implementer context has the wrong shape: {e}"))
        })?;
        return serde_json::to_value(typed).map_err(|e| StepError::Execution(e.to_string()));
    }
    Ok(context)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::test_support::{run_workflow, test_registry};
    use serde_json::json;

    #[tokio::test]
    async fn inline_context_is_resolved_and_passed() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  branch:
    type: string
    required: true
steps:
  - name: review
    type: agent
    agent: echo_agent
    context:
      branch: "${{ inputs.branch }}"
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({"branch": "001-x"})).await;
        assert!(result.success);
        assert_eq!(
            result.step("review").unwrap().output,
            json!({"branch": "001-x"})
        );
    }

    #[tokio::test]
    async fn builder_context_is_constructed_from_the_registry() {
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: review
    type: agent
    agent: echo_agent
    context: test_builder
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(result.success);
        assert_eq!(
            result.step("review").unwrap().output["built_for"],
            json!("wf")
        );
    }

    #[tokio::test]
    async fn implementer_context_is_shaped() {
        let yaml = r#"
version: "1.0"
name: wf
steps:
  - name: implement
    type: agent
    agent: implementer
    context:
      branch: "001-x"
      dry_run: true
"#;
        let (result, _) = run_workflow(yaml, test_registry(), json!({})).await;
        assert!(result.success);
        let output = &result.step("implement").unwrap().output;
        // The echo implementer returns its context: shaped, with defaults
        assert_eq!(output["branch"], json!("001-x"));
        assert_eq!(output["dry_run"], json!(true));
        assert_eq!(output["skip_validation"], json!(false));
    }

    #[test]
    fn unknown_agents_get_the_raw_context() {
        let context = json!({"anything": 1});
        let shaped = shape_agent_context("reviewer", context.clone()).unwrap();
        assert_eq!(shaped, context);
    }
}
