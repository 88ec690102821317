//! Step handlers: one module per step kind.
//!
//! The executor normalises the call: expressions in the step's
//! value-bearing fields are resolved, then the handler invokes the right
//! collaborator and shapes its return into a raw output value. The
//! executor wraps that value into a `StepResult`; handlers never
//! pre-wrap.

pub mod agent;
pub mod branch;
pub mod checkpoint_step;
pub mod generate;
pub mod loop_step;
pub mod parallel;
pub mod python;
pub mod subworkflow;
pub mod validate;

pub use validate::{StageOutcome, ValidationRunner};

use futures_util::future::BoxFuture;
use maverick_types::result::StepResult;
use maverick_types::workflow::{StepKind, StepRecord};
use serde_json::Value;

use super::context::WorkflowContext;
use super::executor::{StepError, WorkflowExecutor};
use super::expression::ExpressionEvaluator;
use super::streaming::EventCallback;

/// Raw handler output plus the resolved inputs the step was invoked with
/// (the latter feed rollback registration).
pub(crate) struct StepOutcome {
    pub output: Value,
    pub resolved_inputs: serde_json::Map<String, Value>,
}

impl StepOutcome {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            resolved_inputs: serde_json::Map::new(),
        }
    }

    pub fn with_inputs(output: Value, resolved_inputs: serde_json::Map<String, Value>) -> Self {
        Self {
            output,
            resolved_inputs,
        }
    }
}

impl WorkflowExecutor {
    /// Select and invoke the handler for a step's variant.
    pub(crate) fn dispatch<'a>(
        &'a self,
        step: &'a StepRecord,
        ctx: &'a mut WorkflowContext,
        callback: &'a EventCallback,
    ) -> BoxFuture<'a, Result<StepOutcome, StepError>> {
        Box::pin(async move {
            if self.cancellation_token().is_cancelled() {
                return Err(StepError::Cancelled);
            }
            match &step.kind {
                StepKind::Python {
                    action,
                    args,
                    kwargs,
                } => self.run_python_step(step, action, args, kwargs, ctx).await,
                StepKind::Agent { agent, context } => {
                    self.run_agent_step(step, agent, context, ctx, callback).await
                }
                StepKind::Generate { generator, context } => {
                    self.run_generate_step(step, generator, context, ctx, callback)
                        .await
                }
                StepKind::Validate { stages } => {
                    self.run_validate_step(step, stages, ctx, callback).await
                }
                StepKind::Subworkflow { workflow, inputs } => {
                    self.run_subworkflow_step(step, workflow, inputs, ctx, callback)
                        .await
                }
                StepKind::Branch { options } => {
                    self.run_branch_step(step, options, ctx, callback).await
                }
                StepKind::Parallel { steps, for_each } => {
                    self.run_parallel_step(step, steps, for_each.as_deref(), ctx, callback)
                        .await
                }
                StepKind::Loop {
                    for_each,
                    until,
                    max_iterations,
                    parallel,
                    steps,
                } => {
                    self.run_loop_step(
                        step,
                        for_each.as_deref(),
                        until.as_deref(),
                        *max_iterations,
                        *parallel,
                        steps,
                        ctx,
                        callback,
                    )
                    .await
                }
                StepKind::Checkpoint { checkpoint_id } => {
                    self.run_checkpoint_step(step, checkpoint_id.as_deref(), ctx, callback)
                        .await
                }
            }
        })
    }

    /// Await a collaborator, aborting at the cancellation signal.
    pub(crate) async fn guarded<T>(
        &self,
        future: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<T, StepError> {
        let token = self.cancellation_token();
        tokio::select! {
            _ = token.cancelled() => Err(StepError::Cancelled),
            result = future => result.map_err(StepError::from),
        }
    }

    /// Resolve a `for_each` expression to its iteration items.
    pub(crate) fn evaluate_for_each(
        &self,
        expression: &str,
        ctx: &WorkflowContext,
    ) -> Result<Vec<Value>, StepError> {
        let evaluator = ExpressionEvaluator::new(ctx);
        let value = evaluator.resolve_value(&Value::String(expression.to_string()))?;
        match value {
            Value::Array(items) => Ok(items),
            other => Err(StepError::Execution(format!(
                "for_each expression `{expression}` must evaluate to a list, got {}",
                type_name(&other)
            ))),
        }
    }
}

/// Shape a nested step's outcome for inclusion in an aggregate result
/// list: skipped steps contribute null, failures contribute an error
/// object, successes their output.
pub(crate) fn step_result_to_value(outcome: Option<StepResult>) -> Value {
    match outcome {
        None => Value::Null,
        Some(result) if result.success => result.output,
        Some(result) => serde_json::json!({ "error": result.error }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
