//! Checkpoint step handler: snapshot the run state at a named boundary.
//!
//! The effective id is the resolved `checkpoint_id` expression, or the
//! step name. The id is deterministic for a given context, so retries of
//! a retryable checkpoint step overwrite one snapshot rather than
//! accumulating per-attempt files. Store errors are logged and never fail
//! the workflow.

use chrono::Utc;
use maverick_types::checkpoint::{compute_inputs_hash, CheckpointData, StepResultRecord};
use maverick_types::event::ProgressEvent;
use maverick_types::workflow::StepRecord;
use serde_json::{json, Value};

use super::StepOutcome;
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::expression::ExpressionEvaluator;
use crate::dsl::streaming::EventCallback;

impl WorkflowExecutor {
    pub(crate) async fn run_checkpoint_step(
        &self,
        step: &StepRecord,
        checkpoint_id: Option<&str>,
        ctx: &WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let effective_id = match checkpoint_id {
            Some(text) => {
                match ExpressionEvaluator::new(ctx).resolve_value(&Value::String(text.to_string()))? {
                    Value::String(id) => id,
                    other => other.to_string(),
                }
            }
            None => step.name.clone(),
        };

        let data = CheckpointData {
            checkpoint_id: effective_id.clone(),
            workflow_name: ctx.workflow_name.clone(),
            inputs_hash: compute_inputs_hash(ctx.inputs()),
            step_results: ctx
                .results_in_order()
                .into_iter()
                .map(|result| StepResultRecord {
                    name: result.name,
                    output: result.output,
                })
                .collect(),
            saved_at: Utc::now(),
        };
        let timestamp = data.saved_at.to_rfc3339();

        if let Err(error) = self.checkpoint_store().save(&ctx.workflow_name, data).await {
            // Save failures warn; the workflow keeps going
            tracing::error!(
                checkpoint_id = effective_id.as_str(),
                %error,
                "checkpoint save failed"
            );
            return Ok(StepOutcome::new(json!({
                "saved": false,
                "checkpoint_id": effective_id,
                "timestamp": timestamp,
            })));
        }

        tracing::info!(
            workflow = ctx.workflow_name.as_str(),
            checkpoint_id = effective_id.as_str(),
            "checkpoint saved"
        );
        callback(ProgressEvent::CheckpointSaved {
            checkpoint_id: effective_id.clone(),
            step_path: step.name.clone(),
        });

        Ok(StepOutcome::new(json!({
            "saved": true,
            "checkpoint_id": effective_id,
            "timestamp": timestamp,
        })))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::dsl::checkpoint::{CheckpointStore, MemoryCheckpointStore};
    use crate::dsl::test_support::{run_workflow_with_store, test_registry};
    use maverick_types::event::ProgressEvent;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn snapshot_contains_prior_results_and_emits_event() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  branch:
    type: string
    required: true
steps:
  - name: init
    type: python
    action: echo
    kwargs:
      branch: "${{ inputs.branch }}"
  - name: done
    type: checkpoint
"#;
        let store = Arc::new(MemoryCheckpointStore::new());
        let (result, events) = run_workflow_with_store(
            yaml,
            test_registry(),
            json!({"branch": "001-x"}),
            store.clone(),
        )
        .await;
        assert!(result.success);

        let saved = store.load("wf", "done").await.unwrap().unwrap();
        assert_eq!(saved.workflow_name, "wf");
        assert_eq!(saved.step_results.len(), 1);
        assert_eq!(saved.step_results[0].name, "init");
        assert_eq!(saved.inputs_hash.len(), 16);

        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::CheckpointSaved { checkpoint_id, .. } if checkpoint_id == "done"
        )));

        let output = &result.step("done").unwrap().output;
        assert_eq!(output["saved"], json!(true));
        assert_eq!(output["checkpoint_id"], json!("done"));
    }

    #[tokio::test]
    async fn checkpoint_id_expression_is_resolved() {
        let yaml = r#"
version: "1.0"
name: wf
inputs:
  phase:
    type: string
    required: true
steps:
  - name: marker
    type: checkpoint
    checkpoint_id: "phase-${{ inputs.phase }}"
"#;
        let store = Arc::new(MemoryCheckpointStore::new());
        let (result, _) =
            run_workflow_with_store(yaml, test_registry(), json!({"phase": "one"}), store.clone())
                .await;
        assert!(result.success);
        assert!(store.load("wf", "phase-one").await.unwrap().is_some());
    }
}
