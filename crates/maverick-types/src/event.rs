//! Progress events emitted during workflow execution.
//!
//! `ProgressEvent` is the unified event type published by the executor and
//! consumed by observers (session journal, UI). All variants are Clone +
//! Send + Sync for use with tokio broadcast channels.
//!
//! Step-scoped events carry a `step_path`: a slash-joined hierarchical
//! identifier unique within a run, e.g. `my_loop/[2]/validate_step`. The
//! `[N]` segments identify loop iteration indices. Enclosing steps rewrite
//! child paths through `apply_path_prefix`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::StepType;

/// Subtype of an `AgentStreamChunk` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    ToolCall,
    ToolResult,
}

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The workflow run has started. Always the first event of a run.
    WorkflowStarted {
        workflow_name: String,
        inputs: serde_json::Map<String, Value>,
    },

    /// The workflow run has finished. Always the last event of a run.
    WorkflowCompleted {
        workflow_name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_step: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_output: Option<Value>,
        #[serde(default)]
        cancelled: bool,
    },

    /// A step has started executing.
    StepStarted {
        step_name: String,
        step_type: StepType,
        step_path: String,
    },

    /// A step has reached a terminal outcome.
    StepCompleted {
        step_name: String,
        step_type: StepType,
        success: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        step_path: String,
    },

    /// A human-readable progress message from a running step.
    StepOutput {
        step_name: String,
        message: String,
        step_path: String,
    },

    /// An incremental chunk from a streaming agent or generator.
    AgentStreamChunk {
        step_name: String,
        agent_name: String,
        text: String,
        chunk_type: ChunkType,
        step_path: String,
    },

    /// A loop or fan-out iteration has started.
    LoopIterationStarted {
        step_name: String,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
        step_path: String,
    },

    /// A loop or fan-out iteration has finished.
    LoopIterationCompleted {
        step_name: String,
        index: usize,
        step_path: String,
    },

    /// Run state was persisted at a checkpoint boundary.
    CheckpointSaved {
        checkpoint_id: String,
        step_path: String,
    },

    /// The failure path has begun; compensations will run next.
    RollbackStarted { failed_step: String },

    /// All registered compensations have been attempted.
    RollbackCompleted { attempted: u32, failed: u32 },

    /// A single compensation failed. Other compensations still run.
    RollbackError { step_name: String, error: String },
}

impl ProgressEvent {
    /// The hierarchical step path, for events that carry one.
    pub fn step_path(&self) -> Option<&str> {
        match self {
            ProgressEvent::StepStarted { step_path, .. }
            | ProgressEvent::StepCompleted { step_path, .. }
            | ProgressEvent::StepOutput { step_path, .. }
            | ProgressEvent::AgentStreamChunk { step_path, .. }
            | ProgressEvent::LoopIterationStarted { step_path, .. }
            | ProgressEvent::LoopIterationCompleted { step_path, .. }
            | ProgressEvent::CheckpointSaved { step_path, .. } => Some(step_path),
            _ => None,
        }
    }

    /// Rewrite the step path to include an enclosing step's prefix.
    ///
    /// Events without a step path pass through unchanged. An empty existing
    /// path is replaced by the prefix itself.
    pub fn apply_path_prefix(&mut self, prefix: &str) {
        let path = match self {
            ProgressEvent::StepStarted { step_path, .. }
            | ProgressEvent::StepCompleted { step_path, .. }
            | ProgressEvent::StepOutput { step_path, .. }
            | ProgressEvent::AgentStreamChunk { step_path, .. }
            | ProgressEvent::LoopIterationStarted { step_path, .. }
            | ProgressEvent::LoopIterationCompleted { step_path, .. }
            | ProgressEvent::CheckpointSaved { step_path, .. } => step_path,
            _ => return,
        };
        if path.is_empty() {
            *path = prefix.to_string();
        } else {
            *path = format!("{prefix}/{path}");
        }
    }

    /// The event tag as it appears on the wire (snake_case variant name).
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::WorkflowStarted { .. } => "workflow_started",
            ProgressEvent::WorkflowCompleted { .. } => "workflow_completed",
            ProgressEvent::StepStarted { .. } => "step_started",
            ProgressEvent::StepCompleted { .. } => "step_completed",
            ProgressEvent::StepOutput { .. } => "step_output",
            ProgressEvent::AgentStreamChunk { .. } => "agent_stream_chunk",
            ProgressEvent::LoopIterationStarted { .. } => "loop_iteration_started",
            ProgressEvent::LoopIterationCompleted { .. } => "loop_iteration_completed",
            ProgressEvent::CheckpointSaved { .. } => "checkpoint_saved",
            ProgressEvent::RollbackStarted { .. } => "rollback_started",
            ProgressEvent::RollbackCompleted { .. } => "rollback_completed",
            ProgressEvent::RollbackError { .. } => "rollback_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_event_tag() {
        let event = ProgressEvent::StepStarted {
            step_name: "init".to_string(),
            step_type: StepType::Python,
            step_path: "init".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], json!("step_started"));
        assert_eq!(value["step_type"], json!("python"));
        assert_eq!(value["step_path"], json!("init"));
    }

    #[test]
    fn chunk_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ChunkType::ToolCall).unwrap(),
            json!("tool_call")
        );
        assert_eq!(
            serde_json::to_value(ChunkType::ToolResult).unwrap(),
            json!("tool_result")
        );
    }

    #[test]
    fn prefix_applies_to_step_scoped_events() {
        let mut event = ProgressEvent::StepCompleted {
            step_name: "validate".to_string(),
            step_type: StepType::Validate,
            success: true,
            duration_ms: 12,
            error: None,
            step_path: "validate".to_string(),
        };
        event.apply_path_prefix("[2]");
        event.apply_path_prefix("my_loop");
        assert_eq!(event.step_path(), Some("my_loop/[2]/validate"));
    }

    #[test]
    fn prefix_replaces_empty_path() {
        let mut event = ProgressEvent::StepOutput {
            step_name: "x".to_string(),
            message: "hi".to_string(),
            step_path: String::new(),
        };
        event.apply_path_prefix("outer");
        assert_eq!(event.step_path(), Some("outer"));
    }

    #[test]
    fn prefix_ignores_lifecycle_events() {
        let mut event = ProgressEvent::WorkflowStarted {
            workflow_name: "wf".to_string(),
            inputs: serde_json::Map::new(),
        };
        event.apply_path_prefix("outer");
        assert!(event.step_path().is_none());
    }

    #[test]
    fn roundtrips_through_json() {
        let event = ProgressEvent::CheckpointSaved {
            checkpoint_id: "done".to_string(),
            step_path: "done".to_string(),
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&text).unwrap();
        assert!(matches!(
            back,
            ProgressEvent::CheckpointSaved { checkpoint_id, .. } if checkpoint_id == "done"
        ));
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let event = ProgressEvent::RollbackCompleted {
            attempted: 2,
            failed: 0,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], json!(event.kind()));
    }
}
