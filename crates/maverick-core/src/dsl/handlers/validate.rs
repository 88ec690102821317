//! Validate step handler: drive the external validation runner over a
//! list of stage names.
//!
//! The stage list is either literal names or a single expression that
//! yields a list at run time. A stage with nothing to check is counted as
//! skipped, not failed. A failing stage short-circuits the remaining
//! stages unless the step carries `continue_on_error`; validate steps
//! retry with backoff by default.

use std::path::Path;

use async_trait::async_trait;
use maverick_types::event::ProgressEvent;
use maverick_types::workflow::{StagesSpec, StepRecord};
use serde_json::{json, Value};

use super::StepOutcome;
use crate::dsl::context::WorkflowContext;
use crate::dsl::executor::{StepError, WorkflowExecutor};
use crate::dsl::expression::ExpressionEvaluator;
use crate::dsl::streaming::EventCallback;

// ---------------------------------------------------------------------------
// External runner contract
// ---------------------------------------------------------------------------

/// Result of running one validation stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    /// The stage had no source files to consider and did not run.
    pub skipped: bool,
}

/// External toolchain that knows how to run a named validation stage in a
/// working directory.
#[async_trait]
pub trait ValidationRunner: Send + Sync {
    async fn run(&self, stage: &str, cwd: &Path) -> anyhow::Result<StageOutcome>;
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

impl WorkflowExecutor {
    pub(crate) async fn run_validate_step(
        &self,
        step: &StepRecord,
        stages: &StagesSpec,
        ctx: &WorkflowContext,
        callback: &EventCallback,
    ) -> Result<StepOutcome, StepError> {
        let runner = self
            .validation_runner()
            .ok_or(StepError::NoValidationRunner)?;

        let stage_names = self.resolve_stage_names(stages, ctx)?;

        let mut stage_results = Vec::with_capacity(stage_names.len());
        let mut skipped = 0u32;
        let mut first_failed: Option<String> = None;

        for stage in &stage_names {
            let outcome = self.guarded(runner.run(stage, self.cwd())).await?;

            if outcome.skipped {
                skipped += 1;
                tracing::info!(stage = stage.as_str(), "validation stage skipped (nothing to check)");
                callback(ProgressEvent::StepOutput {
                    step_name: step.name.clone(),
                    message: format!("stage '{stage}' skipped"),
                    step_path: step.name.clone(),
                });
            } else if !outcome.ok {
                tracing::warn!(stage = stage.as_str(), "validation stage failed");
                if first_failed.is_none() {
                    first_failed = Some(stage.clone());
                }
            }

            stage_results.push(json!({
                "name": stage,
                "ok": outcome.ok || outcome.skipped,
                "skipped": outcome.skipped,
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
            }));

            if first_failed.is_some() && !step.continue_on_error {
                break;
            }
        }

        if let Some(stage) = first_failed {
            return Err(StepError::StageFailed { stage });
        }

        Ok(StepOutcome::new(json!({
            "success": true,
            "stages": stage_results,
            "skipped": skipped,
        })))
    }

    fn resolve_stage_names(
        &self,
        stages: &StagesSpec,
        ctx: &WorkflowContext,
    ) -> Result<Vec<String>, StepError> {
        match stages {
            StagesSpec::List(names) => Ok(names.clone()),
            StagesSpec::Expression(text) => {
                let evaluator = ExpressionEvaluator::new(ctx);
                match evaluator.resolve_value(&Value::String(text.clone()))? {
                    Value::Array(items) => items
                        .into_iter()
                        .map(|item| {
                            item.as_str().map(str::to_string).ok_or_else(|| {
                                StepError::Execution(
                                    "stages expression must yield a list of stage names"
                                        .to_string(),
                                )
                            })
                        })
                        .collect(),
                    Value::String(single) => Ok(vec![single]),
                    _ => Err(StepError::Execution(
                        "stages expression must yield a list of stage names".to_string(),
                    )),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
