//! Workflow executor: walks a parsed workflow, resolves expressions,
//! dispatches step handlers, and emits the progress event stream.
//!
//! # Lifecycle of a run
//!
//! 1. Inputs are completed (defaults applied, required and typed checks).
//! 2. Optional resume: the latest checkpoint is loaded; on an input-hash
//!    match its results seed the context and execution starts at the step
//!    following the checkpoint boundary. A mismatch or load error falls
//!    back to a fresh start.
//! 3. Steps run in order: guard evaluation (falsy skips silently),
//!    handler dispatch with retry/backoff, result recording, events.
//! 4. On failure the registered compensations run in LIFO order, then
//!    the terminal `WorkflowCompleted` is emitted.
//!
//! The executor exclusively owns the workflow context for a run; handlers
//! receive a read-only view plus their resolved inputs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use maverick_types::checkpoint::{compute_inputs_hash, CheckpointData};
use maverick_types::event::ProgressEvent;
use maverick_types::result::{StepResult, WorkflowResult};
use maverick_types::workflow::{StepKind, StepRecord, StepType, WorkflowFile};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::config::DEFAULTS;
use super::context::{RollbackRegistration, WorkflowContext};
use super::expression::{ExpressionError, ExpressionEvaluator};
use super::handlers::ValidationRunner;
use super::registry::{ComponentRegistry, RegistryError};
use super::retry::RetryPolicy;
use super::streaming::EventCallback;

/// Capacity of the progress-event broadcast channel. A run emits a
/// handful of events per step; chatty agent streams can lag a slow
/// subscriber past this many buffered events, which surfaces as a
/// `Lagged` error on its receiver rather than blocking the run.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that prevent a run from starting.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("missing required input '{0}'")]
    MissingRequiredInput(String),

    #[error("input '{name}' must be of type {expected}")]
    InputType { name: String, expected: &'static str },
}

/// Failure of a single step, raised by handlers.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Reference(#[from] RegistryError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("no branch predicate matched")]
    NoBranchMatched,

    #[error("loop reached max_iterations ({0}) before the until condition held")]
    LoopLimitReached(u32),

    #[error("sub-workflow '{workflow}' failed at step '{step}': {error}")]
    Subworkflow {
        workflow: String,
        step: String,
        error: String,
    },

    #[error("validation stage '{stage}' failed")]
    StageFailed { stage: String },

    #[error("no validation runner configured")]
    NoValidationRunner,

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Execution(String),
}

impl From<anyhow::Error> for StepError {
    fn from(error: anyhow::Error) -> Self {
        StepError::Execution(format!("{error:#}"))
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Executes parsed workflows against a component registry.
///
/// Cloning is cheap (all state is shared behind `Arc`s); a clone shares
/// the registry, store, event bus, and cancellation signal. Sub-workflow
/// steps run on such clones.
#[derive(Clone)]
pub struct WorkflowExecutor {
    registry: Arc<ComponentRegistry>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    validation_runner: Option<Arc<dyn ValidationRunner>>,
    events: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
    cwd: PathBuf,
    resume: bool,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<ComponentRegistry>, checkpoint_store: Arc<dyn CheckpointStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            checkpoint_store,
            validation_runner: None,
            events,
            cancel: CancellationToken::new(),
            cwd: PathBuf::from("."),
            resume: false,
        }
    }

    /// Attach the external validation toolchain used by validate steps.
    pub fn with_validation_runner(mut self, runner: Arc<dyn ValidationRunner>) -> Self {
        self.validation_runner = Some(runner);
        self
    }

    /// Working directory handed to validation stages.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Attempt to resume from the latest checkpoint on the next run.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Subscribe to the run's progress events. Subscribe before calling
    /// [`execute`](Self::execute); events emitted with no subscribers are
    /// dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Cooperative cancellation signal for this executor and its
    /// sub-workflows.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub(crate) fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoint_store
    }

    pub(crate) fn validation_runner(&self) -> Option<Arc<dyn ValidationRunner>> {
        self.validation_runner.clone()
    }

    pub(crate) fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Executor for a sub-workflow: shares everything but never resumes.
    pub(crate) fn child_executor(&self) -> Self {
        let mut child = self.clone();
        child.resume = false;
        child
    }

    /// Execute a workflow, broadcasting events to all subscribers.
    pub async fn execute(
        &self,
        workflow: &WorkflowFile,
        inputs: serde_json::Map<String, Value>,
    ) -> Result<WorkflowResult, ExecutorError> {
        let events = self.events.clone();
        let callback: EventCallback = Arc::new(move |event| {
            // A send with no subscribers just drops the event
            let _ = events.send(event);
        });
        self.run(workflow, inputs, callback).await
    }

    /// Execute a workflow with an explicit event callback.
    pub(crate) async fn run(
        &self,
        workflow: &WorkflowFile,
        inputs: serde_json::Map<String, Value>,
        callback: EventCallback,
    ) -> Result<WorkflowResult, ExecutorError> {
        let inputs = complete_inputs(workflow, inputs)?;
        let run_id = Uuid::now_v7();
        let mut ctx = WorkflowContext::new(&workflow.name, run_id, inputs.clone());

        let mut start_index = 0;
        if self.resume {
            start_index = self.try_resume(workflow, &inputs, &mut ctx).await;
        }

        callback(ProgressEvent::WorkflowStarted {
            workflow_name: workflow.name.clone(),
            inputs: inputs.clone(),
        });
        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            start_index,
            "starting workflow run"
        );

        let mut final_output = Value::Null;
        let mut failed_step: Option<String> = None;
        let mut cancelled = false;

        for step in &workflow.steps[start_index..] {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            match self.run_step(step, &mut ctx, &callback).await {
                // Guard skipped the step: inert
                None => continue,
                Some(result) => {
                    if result.success {
                        final_output = result.output;
                    } else if !step.continue_on_error {
                        failed_step = Some(step.name.clone());
                        cancelled = self.cancel.is_cancelled();
                        break;
                    }
                }
            }
        }

        if failed_step.is_some() || cancelled {
            let (attempted, failures) = self.run_rollbacks(&ctx, &failed_step, &callback).await;
            callback(ProgressEvent::WorkflowCompleted {
                workflow_name: workflow.name.clone(),
                success: false,
                failed_step: failed_step.clone(),
                final_output: None,
                cancelled,
            });
            tracing::warn!(
                run_id = %run_id,
                workflow = workflow.name.as_str(),
                failed_step = failed_step.as_deref().unwrap_or("<none>"),
                cancelled,
                "workflow run failed"
            );
            return Ok(WorkflowResult {
                run_id,
                workflow_name: workflow.name.clone(),
                success: false,
                cancelled,
                results: ctx.results_in_order(),
                final_output: Value::Null,
                failed_step,
                rollbacks_attempted: attempted,
                rollbacks_failed: failures,
            });
        }

        callback(ProgressEvent::WorkflowCompleted {
            workflow_name: workflow.name.clone(),
            success: true,
            failed_step: None,
            final_output: Some(final_output.clone()),
            cancelled: false,
        });
        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            "workflow run completed"
        );
        Ok(WorkflowResult {
            run_id,
            workflow_name: workflow.name.clone(),
            success: true,
            cancelled: false,
            results: ctx.results_in_order(),
            final_output,
            failed_step: None,
            rollbacks_attempted: 0,
            rollbacks_failed: 0,
        })
    }

    /// Load the latest checkpoint and seed the context from it, returning
    /// the index of the first step to execute. Any mismatch or error
    /// means a fresh start.
    async fn try_resume(
        &self,
        workflow: &WorkflowFile,
        inputs: &serde_json::Map<String, Value>,
        ctx: &mut WorkflowContext,
    ) -> usize {
        let checkpoint = match self.checkpoint_store.load_latest(&workflow.name).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return 0,
            Err(error) => {
                tracing::warn!(%error, "checkpoint load failed; starting fresh");
                return 0;
            }
        };

        if checkpoint.inputs_hash != compute_inputs_hash(inputs) {
            tracing::info!(
                workflow = workflow.name.as_str(),
                checkpoint_id = checkpoint.checkpoint_id.as_str(),
                "checkpoint inputs differ from this run; starting fresh"
            );
            return 0;
        }

        ctx.seed(&checkpoint.step_results);
        let start_index = resume_index(workflow, &checkpoint);
        tracing::info!(
            workflow = workflow.name.as_str(),
            checkpoint_id = checkpoint.checkpoint_id.as_str(),
            restored_steps = checkpoint.step_results.len(),
            start_index,
            "resuming from checkpoint"
        );
        start_index
    }

    /// Run one step: guard, retry loop, result recording, events.
    ///
    /// Returns `None` when the guard skipped the step (no events, no
    /// stored result).
    pub(crate) fn run_step<'a>(
        &'a self,
        step: &'a StepRecord,
        ctx: &'a mut WorkflowContext,
        callback: &'a EventCallback,
    ) -> BoxFuture<'a, Option<StepResult>> {
        Box::pin(async move {
            let step_type = step.step_type();

            let mut guard_error = None;
            if let Some(condition) = &step.condition {
                match ExpressionEvaluator::new(ctx).evaluate_condition(condition) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(step = step.name.as_str(), "guard falsy; skipping step");
                        return None;
                    }
                    Err(error) => guard_error = Some(error),
                }
            }

            callback(ProgressEvent::StepStarted {
                step_name: step.name.clone(),
                step_type,
                step_path: step.name.clone(),
            });

            let policy = RetryPolicy::resolve(step);
            let max_attempts = policy.as_ref().map(|p| p.attempts).unwrap_or(1);
            let started = Instant::now();

            let outcome = if let Some(error) = guard_error {
                Err(StepError::Expression(error))
            } else {
                let mut attempt = 1u32;
                loop {
                    match self.dispatch(step, ctx, callback).await {
                        Ok(outcome) => break Ok(outcome),
                        Err(StepError::Cancelled) => break Err(StepError::Cancelled),
                        Err(error) if attempt < max_attempts => {
                            let delay = policy
                                .as_ref()
                                .expect("retrying implies a policy")
                                .delay_after(attempt);
                            tracing::warn!(
                                step = step.name.as_str(),
                                attempt,
                                max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                %error,
                                "step failed; retrying after backoff"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(error) => break Err(error),
                    }
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(outcome) => {
                    let output = validate_step_output(&step.name, step_type, outcome.output);
                    if let Some(rollback) = &step.rollback {
                        self.register_rollback(step, rollback, outcome.resolved_inputs, ctx);
                    }
                    StepResult::success(&step.name, step_type, output, duration_ms)
                }
                Err(error) => {
                    tracing::error!(
                        step = step.name.as_str(),
                        step_type = %step_type,
                        %error,
                        "step failed"
                    );
                    StepResult::failure(&step.name, step_type, error.to_string(), duration_ms)
                }
            };

            ctx.store_result(result.clone());
            callback(ProgressEvent::StepCompleted {
                step_name: step.name.clone(),
                step_type,
                success: result.success,
                duration_ms,
                error: result.error.clone(),
                step_path: step.name.clone(),
            });
            Some(result)
        })
    }

    fn register_rollback(
        &self,
        step: &StepRecord,
        rollback: &str,
        kwargs: serde_json::Map<String, Value>,
        ctx: &WorkflowContext,
    ) {
        match self.registry.actions.get(rollback) {
            Ok(action) => ctx.register_rollback(RollbackRegistration {
                step_name: step.name.clone(),
                action,
                kwargs,
            }),
            Err(_) => {
                tracing::warn!(
                    step = step.name.as_str(),
                    rollback,
                    "rollback action not registered; skipping registration"
                );
            }
        }
    }

    /// Invoke registered compensations in LIFO order. Per-compensation
    /// errors are reported and do not halt the remaining ones.
    async fn run_rollbacks(
        &self,
        ctx: &WorkflowContext,
        failed_step: &Option<String>,
        callback: &EventCallback,
    ) -> (u32, u32) {
        callback(ProgressEvent::RollbackStarted {
            failed_step: failed_step.clone().unwrap_or_else(|| "<cancelled>".to_string()),
        });

        let mut attempted = 0u32;
        let mut failures = 0u32;
        for registration in ctx.drain_rollbacks().into_iter().rev() {
            attempted += 1;
            tracing::info!(
                step = registration.step_name.as_str(),
                "running rollback compensation"
            );
            if let Err(error) = registration
                .action
                .call(&[], registration.kwargs.clone())
                .await
            {
                failures += 1;
                tracing::error!(
                    step = registration.step_name.as_str(),
                    error = %error,
                    "rollback compensation failed"
                );
                callback(ProgressEvent::RollbackError {
                    step_name: registration.step_name.clone(),
                    error: format!("{error:#}"),
                });
            }
        }

        callback(ProgressEvent::RollbackCompleted {
            attempted,
            failed: failures,
        });
        (attempted, failures)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Apply defaults and verify required/typed inputs.
fn complete_inputs(
    workflow: &WorkflowFile,
    mut provided: serde_json::Map<String, Value>,
) -> Result<serde_json::Map<String, Value>, ExecutorError> {
    for (name, spec) in &workflow.inputs {
        match provided.get(name) {
            Some(value) => {
                if !spec.input_type.matches(value) {
                    return Err(ExecutorError::InputType {
                        name: name.clone(),
                        expected: spec.input_type.as_str(),
                    });
                }
            }
            None => {
                if let Some(default) = &spec.default {
                    provided.insert(name.clone(), default.clone());
                } else if spec.required {
                    return Err(ExecutorError::MissingRequiredInput(name.clone()));
                }
            }
        }
    }
    Ok(provided)
}

/// Coerce a handler return into a context-safe stored output.
///
/// Outputs are already JSON values; oversized containers are kept but
/// logged so authors notice expressions over them may be slow.
fn validate_step_output(step_name: &str, step_type: StepType, output: Value) -> Value {
    let items = match &output {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 0,
    };
    if items > DEFAULTS.max_output_items {
        tracing::warn!(
            step = step_name,
            step_type = %step_type,
            items,
            "step output is very large"
        );
    }
    output
}

/// First step to execute after restoring from a checkpoint.
fn resume_index(workflow: &WorkflowFile, checkpoint: &CheckpointData) -> usize {
    // Prefer the checkpoint step whose static id (or name) matches
    for (index, step) in workflow.steps.iter().enumerate() {
        if let StepKind::Checkpoint { checkpoint_id } = &step.kind {
            let static_id = checkpoint_id
                .as_deref()
                .filter(|id| !id.contains("${{"))
                .unwrap_or(step.name.as_str());
            if static_id == checkpoint.checkpoint_id {
                return index + 1;
            }
        }
    }
    // Dynamic ids: skip the leading run of steps the snapshot restored
    let completed: std::collections::HashSet<&str> = checkpoint
        .step_results
        .iter()
        .map(|record| record.name.as_str())
        .collect();
    workflow
        .steps
        .iter()
        .position(|step| !completed.contains(step.name.as_str()))
        .unwrap_or(workflow.steps.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
