//! Shared fixtures for engine tests: a stub registry, validation runner
//! stubs, and helpers that parse and run a workflow while collecting its
//! event stream.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use maverick_types::event::ProgressEvent;
use maverick_types::result::WorkflowResult;
use serde_json::{json, Value};

use super::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use super::context::WorkflowContext;
use super::executor::WorkflowExecutor;
use super::handlers::{StageOutcome, ValidationRunner};
use super::parser::parse_workflow;
use super::registry::{
    Action, Agent, AgentFactory, ComponentRegistry, ContextBuilder, FnAction, Generator,
    GeneratorFactory,
};
use super::streaming::{EventCallback, StreamingContext};

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn execute(
        &self,
        context: Value,
        _stream: Option<StreamingContext>,
    ) -> anyhow::Result<Value> {
        Ok(context)
    }
}

struct CommitTitleGenerator;

#[async_trait]
impl Generator for CommitTitleGenerator {
    async fn generate(&self, context: Value) -> anyhow::Result<String> {
        let branch = context
            .get("branch")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        Ok(format!("generated for {branch}"))
    }
}

struct TestBuilder;

#[async_trait]
impl ContextBuilder for TestBuilder {
    async fn build(
        &self,
        _resolved: &serde_json::Map<String, Value>,
        context: &WorkflowContext,
    ) -> anyhow::Result<Value> {
        Ok(json!({ "built_for": context.workflow_name }))
    }
}

/// Sleeps long enough that tests can cancel it mid-flight.
struct SleepyAction;

#[async_trait]
impl Action for SleepyAction {
    async fn call(
        &self,
        _args: &[Value],
        _kwargs: serde_json::Map<String, Value>,
    ) -> anyhow::Result<Value> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(Value::Null)
    }
}

/// Stub toolchain: every stage passes, except `no_sources` which is
/// skipped and an optional named stage which fails.
struct StubRunner {
    failing_stage: Option<String>,
}

#[async_trait]
impl ValidationRunner for StubRunner {
    async fn run(&self, stage: &str, _cwd: &Path) -> anyhow::Result<StageOutcome> {
        if stage == "no_sources" {
            return Ok(StageOutcome {
                ok: true,
                skipped: true,
                ..StageOutcome::default()
            });
        }
        if self.failing_stage.as_deref() == Some(stage) {
            return Ok(StageOutcome {
                ok: false,
                stderr: format!("stage {stage} found problems"),
                ..StageOutcome::default()
            });
        }
        Ok(StageOutcome {
            ok: true,
            stdout: format!("stage {stage} ok"),
            ..StageOutcome::default()
        })
    }
}

pub(crate) fn passing_runner() -> Arc<dyn ValidationRunner> {
    Arc::new(StubRunner {
        failing_stage: None,
    })
}

pub(crate) fn failing_stage_runner(stage: &str) -> Arc<dyn ValidationRunner> {
    Arc::new(StubRunner {
        failing_stage: Some(stage.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A lenient registry with the standard stub components.
pub(crate) fn test_registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::lenient();

    registry
        .actions
        .register(
            "noop",
            Arc::new(FnAction::new(|_, _| Ok(Value::Null))) as Arc<dyn Action>,
        )
        .unwrap();
    registry
        .actions
        .register(
            "echo",
            Arc::new(FnAction::new(|_, kwargs| Ok(Value::Object(kwargs)))) as Arc<dyn Action>,
        )
        .unwrap();
    registry
        .actions
        .register(
            "double",
            Arc::new(FnAction::new(|_, kwargs| {
                let n = kwargs
                    .get("n")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| anyhow::anyhow!("double requires an integer 'n'"))?;
                Ok(json!(n * 2))
            })) as Arc<dyn Action>,
        )
        .unwrap();
    registry
        .actions
        .register(
            "always_fails",
            Arc::new(FnAction::new(|_, _| anyhow::bail!("intentional failure")))
                as Arc<dyn Action>,
        )
        .unwrap();
    registry
        .actions
        .register("sleepy", Arc::new(SleepyAction) as Arc<dyn Action>)
        .unwrap();

    // Returns {done:false} twice, then {done:true}
    let countdown = Arc::new(AtomicUsize::new(0));
    registry
        .actions
        .register(
            "countdown_done",
            Arc::new(FnAction::new(move |_, _| {
                let n = countdown.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "done": n >= 3 }))
            })) as Arc<dyn Action>,
        )
        .unwrap();

    for name in ["echo_agent", "implementer"] {
        let factory: Arc<dyn AgentFactory> = Arc::new(|| Box::new(EchoAgent) as Box<dyn Agent>);
        registry.agents.register(name, factory).unwrap();
    }

    let generator: Arc<dyn GeneratorFactory> =
        Arc::new(|| Box::new(CommitTitleGenerator) as Box<dyn Generator>);
    registry.generators.register("commit_title", generator).unwrap();

    registry
        .context_builders
        .register("test_builder", Arc::new(TestBuilder) as Arc<dyn ContextBuilder>)
        .unwrap();

    registry
}

// ---------------------------------------------------------------------------
// Run helpers
// ---------------------------------------------------------------------------

pub(crate) fn collecting_callback() -> (EventCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: EventCallback = Arc::new(move |event| {
        sink.lock().unwrap().push(event);
    });
    (callback, events)
}

pub(crate) fn executor_with(
    registry: Arc<ComponentRegistry>,
    store: Arc<dyn CheckpointStore>,
) -> WorkflowExecutor {
    WorkflowExecutor::new(registry, store).with_validation_runner(passing_runner())
}

fn as_inputs(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("inputs must be a JSON object, got {other}"),
    }
}

async fn run_parsed(
    yaml: &str,
    executor: WorkflowExecutor,
    inputs: Value,
) -> (WorkflowResult, Vec<ProgressEvent>) {
    let workflow = parse_workflow(yaml).expect("test workflow must parse");
    let (callback, events) = collecting_callback();
    let result = executor
        .run(&workflow, as_inputs(inputs), callback)
        .await
        .expect("run must start");
    let events = events.lock().unwrap().clone();
    (result, events)
}

/// Parse and run a workflow with the stub runner and a fresh in-memory
/// checkpoint store, returning the result and the collected events.
pub(crate) async fn run_workflow(
    yaml: &str,
    registry: ComponentRegistry,
    inputs: Value,
) -> (WorkflowResult, Vec<ProgressEvent>) {
    run_workflow_with_store(yaml, registry, inputs, Arc::new(MemoryCheckpointStore::new())).await
}

pub(crate) async fn run_workflow_with_store(
    yaml: &str,
    registry: ComponentRegistry,
    inputs: Value,
    store: Arc<dyn CheckpointStore>,
) -> (WorkflowResult, Vec<ProgressEvent>) {
    let executor = executor_with(Arc::new(registry), store);
    run_parsed(yaml, executor, inputs).await
}

pub(crate) async fn run_workflow_with_runner(
    yaml: &str,
    registry: ComponentRegistry,
    inputs: Value,
    runner: Arc<dyn ValidationRunner>,
) -> (WorkflowResult, Vec<ProgressEvent>) {
    let executor = WorkflowExecutor::new(
        Arc::new(registry),
        Arc::new(MemoryCheckpointStore::new()),
    )
    .with_validation_runner(runner);
    run_parsed(yaml, executor, inputs).await
}

pub(crate) async fn run_workflow_without_runner(
    yaml: &str,
    registry: ComponentRegistry,
    inputs: Value,
) -> (WorkflowResult, Vec<ProgressEvent>) {
    let executor = WorkflowExecutor::new(
        Arc::new(registry),
        Arc::new(MemoryCheckpointStore::new()),
    );
    run_parsed(yaml, executor, inputs).await
}
