//! Execution result types: per-step outcomes and the final run summary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::StepType;

/// The recorded outcome of a single step.
///
/// Stored in the workflow context under the step name; step outputs are
/// values and are never mutated after being stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub step_type: StepType,
    pub success: bool,
    /// Raw output value returned by the handler (Null on failure).
    pub output: Value,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    /// A successful result with the given output.
    pub fn success(name: impl Into<String>, step_type: StepType, output: Value, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: true,
            output,
            duration_ms,
            error: None,
        }
    }

    /// A failed result carrying the error diagnostic.
    pub fn failure(
        name: impl Into<String>,
        step_type: StepType,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: false,
            output: Value::Null,
            duration_ms,
            error: Some(error.into()),
        }
    }
}

/// The final summary of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// UUIDv7 run identifier.
    pub run_id: Uuid,
    pub workflow_name: String,
    pub success: bool,
    /// True when the run ended because of cooperative cancellation.
    #[serde(default)]
    pub cancelled: bool,
    /// Step results in completion order (seeded results first on resume).
    pub results: Vec<StepResult>,
    /// Output of the last non-skipped step on success.
    pub final_output: Value,
    /// Name of the first terminally failed step, when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Compensations attempted during the failure path.
    #[serde(default)]
    pub rollbacks_attempted: u32,
    /// Compensations that themselves failed.
    #[serde(default)]
    pub rollbacks_failed: u32,
}

impl WorkflowResult {
    /// Look up a step result by name.
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
