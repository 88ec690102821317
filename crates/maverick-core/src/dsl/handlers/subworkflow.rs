//! Sub-workflow step handler: run a registered workflow with its own
//! context.
//!
//! The child runs under a fresh executor clone (sharing the cancellation
//! signal) and its events stream to the parent re-rooted under this
//! step's path. The child's own `WorkflowStarted` / `WorkflowCompleted`
//! frames are dropped: the parent's lifecycle events frame the run.
//! Child failure propagates as this step's failure.

use std::sync::Arc;

use maverick_types::event::ProgressEvent;
use maverick_types::workflow::StepRecord;
use serde_json::Value;

use super::StepOutcome;
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::expression::ExpressionEvaluator;
use crate::dsl::streaming::EventCallback;

impl WorkflowExecutor {
    pub(crate) async fn run_subworkflow_step(
        &self,
        step: &StepRecord,
        workflow_name: &str,
        inputs: &serde_json::Map<String, Value>,
        ctx: &WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let workflow = self.registry().workflows.get(workflow_name)?;
        let resolved_inputs = ExpressionEvaluator::new(ctx).resolve_map(inputs)?;

        let child_callback: EventCallback = {
            let parent = callback.clone();
            let prefix = step.name.clone();
            Arc::new(move |mut event: ProgressEvent| {
                if matches!(
                    event,
                    ProgressEvent::WorkflowStarted { .. } | ProgressEvent::WorkflowCompleted { .. }
                ) {
                    return;
                }
                event.apply_path_prefix(&prefix);
                parent(event);
            })
        };

        tracing::debug!(
            step = step.name.as_str(),
            workflow = workflow_name,
            "starting sub-workflow"
        );

        let child = self.child_executor();
        let result = child
            .run(&workflow, resolved_inputs.clone(), child_callback)
            .await
            .map_err(|e| StepError::Execution(format!("sub-workflow '{workflow_name}': {e}")))?;

        if !result.success {
            let failed = result.failed_step.clone().unwrap_or_default();
            let error = result
                .step(&failed)
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "failed".to_string());
            return Err(StepError::Subworkflow {
                workflow: workflow_name.to_string(),
                step: failed,
                error,
            });
        }

        Ok(StepOutcome::with_inputs(result.final_output, resolved_inputs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
