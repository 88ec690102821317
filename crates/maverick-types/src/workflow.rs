//! Workflow definition types for Maverick.
//!
//! Defines the immutable representation a workflow YAML file parses into:
//! `WorkflowFile` with its ordered `steps` of tagged `StepRecord` variants.
//! These types are pure data -- parsing, validation, and execution live in
//! `maverick-core`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// WorkflowFile
// ---------------------------------------------------------------------------

/// A parsed workflow definition.
///
/// Produced by the parser from a workflow YAML document and never mutated
/// afterwards. Sub-workflows resolve to another `WorkflowFile` through the
/// component registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    /// Schema version string (currently always "1.0").
    pub version: String,
    /// Workflow name, unique within a registry.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Optional single-glyph icon for UI display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Declared workflow inputs keyed by name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, InputSpec>,
    /// Ordered sequence of steps.
    pub steps: Vec<StepRecord>,
}

// ---------------------------------------------------------------------------
// Input declarations
// ---------------------------------------------------------------------------

/// Declared type of a workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    String,
    #[serde(alias = "int")]
    Integer,
    Float,
    #[serde(alias = "bool")]
    Boolean,
    Array,
    Object,
}

impl InputType {
    /// Whether a JSON value matches this declared type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            InputType::String => value.is_string(),
            InputType::Integer => value.is_i64() || value.is_u64(),
            InputType::Float => value.is_number(),
            InputType::Boolean => value.is_boolean(),
            InputType::Array => value.is_array(),
            InputType::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::String => "string",
            InputType::Integer => "integer",
            InputType::Float => "float",
            InputType::Boolean => "boolean",
            InputType::Array => "array",
            InputType::Object => "object",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a single workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub input_type: InputType,
    #[serde(default)]
    pub required: bool,
    /// Default value applied when the caller omits this input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Step records
// ---------------------------------------------------------------------------

/// The kind of a workflow step, used in events and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Python,
    Agent,
    Generate,
    Validate,
    Subworkflow,
    Branch,
    Parallel,
    Loop,
    Checkpoint,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Python => "python",
            StepType::Agent => "agent",
            StepType::Generate => "generate",
            StepType::Validate => "validate",
            StepType::Subworkflow => "subworkflow",
            StepType::Branch => "branch",
            StepType::Parallel => "parallel",
            StepType::Loop => "loop",
            StepType::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step in a workflow.
///
/// Common fields apply to every variant; the variant-specific payload is
/// flattened so the YAML shape stays `type: python` / `action: ...` at one
/// level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name, unique among its siblings.
    pub name: String,
    /// Optional guard expression. A falsy guard skips the step silently.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Registered action to run as compensation if a later step fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<String>,
    /// When true, a failure of this step does not fail the workflow.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Explicit retry policy for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepRecord {
    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }
}

/// Variant payload of a step, discriminated on the YAML `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a registered action with positional and keyword arguments.
    Python {
        action: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        kwargs: serde_json::Map<String, Value>,
    },
    /// Run a registered agent against a built or inline context.
    Agent {
        agent: String,
        #[serde(default)]
        context: ContextSpec,
    },
    /// Run a registered text generator against a built or inline context.
    Generate {
        generator: String,
        #[serde(default)]
        context: ContextSpec,
    },
    /// Run a sequence of validation stages through the external runner.
    Validate { stages: StagesSpec },
    /// Execute another registered workflow with its own context.
    Subworkflow {
        workflow: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        inputs: serde_json::Map<String, Value>,
    },
    /// Evaluate option predicates in order and run the first match.
    Branch { options: Vec<BranchOption> },
    /// Run nested steps concurrently, optionally fanned out over `for_each`.
    Parallel {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        steps: Vec<StepRecord>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        for_each: Option<String>,
    },
    /// Iterate nested steps over a list or until a condition holds.
    Loop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        for_each: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<String>,
        #[serde(default = "default_max_iterations")]
        max_iterations: u32,
        #[serde(default)]
        parallel: bool,
        steps: Vec<StepRecord>,
    },
    /// Persist the run state under a checkpoint id.
    Checkpoint {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint_id: Option<String>,
    },
}

fn default_max_iterations() -> u32 {
    30
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Python { .. } => StepType::Python,
            StepKind::Agent { .. } => StepType::Agent,
            StepKind::Generate { .. } => StepType::Generate,
            StepKind::Validate { .. } => StepType::Validate,
            StepKind::Subworkflow { .. } => StepType::Subworkflow,
            StepKind::Branch { .. } => StepType::Branch,
            StepKind::Parallel { .. } => StepType::Parallel,
            StepKind::Loop { .. } => StepType::Loop,
            StepKind::Checkpoint { .. } => StepType::Checkpoint,
        }
    }
}

/// One option of a branch step: a predicate expression and the step to run
/// when it is the first to evaluate truthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchOption {
    pub when: String,
    pub step: Box<StepRecord>,
}

/// Context for agent and generate steps: either the name of a registered
/// context builder or an inline map whose values may contain expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextSpec {
    Builder(String),
    Inline(serde_json::Map<String, Value>),
}

impl Default for ContextSpec {
    fn default() -> Self {
        ContextSpec::Inline(serde_json::Map::new())
    }
}

/// Stage list for a validate step: either explicit names or a single
/// expression that evaluates to a list of names at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StagesSpec {
    List(Vec<String>),
    Expression(String),
}

// ---------------------------------------------------------------------------
// Retry configuration
// ---------------------------------------------------------------------------

/// Retry policy for a step: bounded attempts with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySpec {
    /// Maximum number of attempts, including the first.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    /// Base delay in seconds before the first retry.
    #[serde(default = "default_retry_delay")]
    pub delay_s: f64,
    /// Upper bound on the backoff delay in seconds.
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_s: f64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_retry_max_delay() -> f64 {
    60.0
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_s: default_retry_delay(),
            max_delay_s: default_retry_max_delay(),
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

    // -----------------------------------------------------------------------
    // YAML parsing of all step variants
    // -----------------------------------------------------------------------

    #[test]
    fn parse_python_step_yaml() {
        let yaml = r#"
name: init
type: python
action: init_workspace
kwargs:
  branch: "001-x"
  clean: true
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.name, "init");
        assert_eq!(step.step_type(), StepType::Python);
        match &step.kind {
            StepKind::Python { action, kwargs, .. } => {
                assert_eq!(action, "init_workspace");
                assert_eq!(kwargs["branch"], json!("001-x"));
                assert_eq!(kwargs["clean"], json!(true));
            }
            other => panic!("expected python step, got {other:?}"),
        }
    }

    #[test]
    fn parse_agent_step_with_builder_context() {
        let yaml = r#"
name: implement
type: agent
agent: implementer
context: implementation_context
rollback: cleanup_workspace
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.rollback.as_deref(), Some("cleanup_workspace"));
        match &step.kind {
            StepKind::Agent { agent, context } => {
                assert_eq!(agent, "implementer");
                assert!(matches!(context, ContextSpec::Builder(b) if b == "implementation_context"));
            }
            other => panic!("expected agent step, got {other:?}"),
        }
    }

    #[test]
    fn parse_agent_step_with_inline_context() {
        let yaml = r#"
name: review
type: agent
agent: reviewer
context:
  branch: "${{ inputs.branch }}"
  strict: true
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        match &step.kind {
            StepKind::Agent { context, .. } => match context {
                ContextSpec::Inline(map) => {
                    assert_eq!(map["branch"], json!("${{ inputs.branch }}"));
                    assert_eq!(map["strict"], json!(true));
                }
                other => panic!("expected inline context, got {other:?}"),
            },
            other => panic!("expected agent step, got {other:?}"),
        }
    }

    #[test]
    fn parse_validate_step_with_stage_list() {
        let yaml = r#"
name: check
type: validate
stages: [lint, test]
continue_on_error: true
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(step.continue_on_error);
        match &step.kind {
            StepKind::Validate { stages } => {
                assert!(matches!(stages, StagesSpec::List(s) if s == &["lint", "test"]));
            }
            other => panic!("expected validate step, got {other:?}"),
        }
    }

    #[test]
    fn parse_validate_step_with_expression_stages() {
        let yaml = r#"
name: check
type: validate
stages: "${{ inputs.stages }}"
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        match &step.kind {
            StepKind::Validate { stages } => {
                assert!(matches!(stages, StagesSpec::Expression(e) if e == "${{ inputs.stages }}"));
            }
            other => panic!("expected validate step, got {other:?}"),
        }
    }

    #[test]
    fn parse_branch_step() {
        let yaml = r#"
name: pick
type: branch
options:
  - when: "${{ inputs.fast }}"
    step:
      name: quick
      type: python
      action: quick_path
  - when: "${{ not inputs.fast }}"
    step:
      name: slow
      type: python
      action: slow_path
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        match &step.kind {
            StepKind::Branch { options } => {
                assert_eq!(options.len(), 2);
                assert_eq!(options[0].when, "${{ inputs.fast }}");
                assert_eq!(options[1].step.name, "slow");
            }
            other => panic!("expected branch step, got {other:?}"),
        }
    }

    #[test]
    fn parse_parallel_for_each_step() {
        let yaml = r#"
name: fan_out
type: parallel
for_each: "${{ inputs.items }}"
steps:
  - name: double
    type: python
    action: double
    kwargs:
      n: "${{ item }}"
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        match &step.kind {
            StepKind::Parallel { steps, for_each } => {
                assert_eq!(for_each.as_deref(), Some("${{ inputs.items }}"));
                assert_eq!(steps.len(), 1);
            }
            other => panic!("expected parallel step, got {other:?}"),
        }
    }

    #[test]
    fn parse_until_loop_with_default_cap() {
        let yaml = r#"
name: converge
type: loop
until: "${{ steps.check.output.done }}"
steps:
  - name: work
    type: python
    action: work
  - name: check
    type: python
    action: check_done
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        match &step.kind {
            StepKind::Loop {
                until,
                for_each,
                max_iterations,
                parallel,
                steps,
            } => {
                assert_eq!(until.as_deref(), Some("${{ steps.check.output.done }}"));
                assert!(for_each.is_none());
                assert_eq!(*max_iterations, 30);
                assert!(!parallel);
                assert_eq!(steps.len(), 2);
            }
            other => panic!("expected loop step, got {other:?}"),
        }
    }

    #[test]
    fn parse_checkpoint_step() {
        let yaml = r#"
name: done
type: checkpoint
checkpoint_id: "phase-${{ inputs.phase }}"
"#;
        let step: StepRecord = serde_yaml_ng::from_str(yaml).unwrap();
        match &step.kind {
            StepKind::Checkpoint { checkpoint_id } => {
                assert_eq!(checkpoint_id.as_deref(), Some("phase-${{ inputs.phase }}"));
            }
            other => panic!("expected checkpoint step, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Full workflow file roundtrip
    // -----------------------------------------------------------------------

    #[test]
    fn workflow_file_yaml_roundtrip() {
        let yaml = r#"
version: "1.0"
name: feature-build
description: Implement and validate a feature branch
icon: F
inputs:
  branch:
    type: string
    required: true
    description: Feature branch name
  dry_run:
    type: boolean
    required: false
    default: false
steps:
  - name: init
    type: python
    action: init_workspace
    kwargs:
      branch: "${{ inputs.branch }}"
  - name: implement
    type: agent
    agent: implementer
    context: implementation_context
  - name: check
    type: validate
    stages: [lint, test]
  - name: done
    type: checkpoint
"#;
        let wf: WorkflowFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(wf.name, "feature-build");
        assert_eq!(wf.version, "1.0");
        assert_eq!(wf.inputs.len(), 2);
        assert!(wf.inputs["branch"].required);
        assert_eq!(wf.inputs["dry_run"].default, Some(json!(false)));
        assert_eq!(wf.steps.len(), 4);

        let out = serde_yaml_ng::to_string(&wf).unwrap();
        let back: WorkflowFile = serde_yaml_ng::from_str(&out).unwrap();
        assert_eq!(back.name, wf.name);
        assert_eq!(back.steps.len(), wf.steps.len());
        assert_eq!(back.steps[1].step_type(), StepType::Agent);
    }

    // -----------------------------------------------------------------------
    // Input types
    // -----------------------------------------------------------------------

    #[test]
    fn input_type_matches_values() {
        assert!(InputType::String.matches(&json!("x")));
        assert!(InputType::Integer.matches(&json!(3)));
        assert!(!InputType::Integer.matches(&json!(3.5)));
        assert!(InputType::Float.matches(&json!(3.5)));
        assert!(InputType::Float.matches(&json!(3)));
        assert!(InputType::Boolean.matches(&json!(true)));
        assert!(InputType::Array.matches(&json!([1, 2])));
        assert!(InputType::Object.matches(&json!({"k": 1})));
        assert!(!InputType::Object.matches(&json!([1])));
    }

    #[test]
    fn input_type_accepts_aliases() {
        let spec: InputSpec = serde_yaml_ng::from_str("type: int").unwrap();
        assert_eq!(spec.input_type, InputType::Integer);
        let spec: InputSpec = serde_yaml_ng::from_str("type: bool").unwrap();
        assert_eq!(spec.input_type, InputType::Boolean);
    }

    // -----------------------------------------------------------------------
    // Retry spec defaults
    // -----------------------------------------------------------------------

    #[test]
    fn retry_spec_defaults() {
        let spec: RetrySpec = serde_yaml_ng::from_str("attempts: 5").unwrap();
        assert_eq!(spec.attempts, 5);
        assert_eq!(spec.delay_s, 1.0);
        assert_eq!(spec.max_delay_s, 60.0);
        assert_eq!(RetrySpec::default().attempts, 3);
    }
}
