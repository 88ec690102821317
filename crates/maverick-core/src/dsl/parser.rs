//! Workflow YAML parsing and validation.
//!
//! The parse pipeline:
//! 1. YAML to a document value; unknown top-level keys are rejected.
//! 2. Structural check of every step against its variant's field set.
//! 3. Deserialize into the immutable [`WorkflowFile`].
//! 4. Semantic validation: sibling step-name uniqueness, loop invariants,
//!    and syntactic validity of every embedded expression.
//! 5. Optionally (strict registries), referenced components must exist.
//!
//! [`extract_expressions`] walks a parsed workflow yielding every
//! `${{ … }}` fragment so external tools can surface variable usage
//! without running the workflow.

use std::collections::HashSet;

use maverick_types::workflow::{ContextSpec, StagesSpec, StepKind, StepRecord, WorkflowFile};

use super::expression::{self, Expression, ExpressionError};
use super::registry::{ComponentRegistry, RegistryError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while parsing or validating a workflow definition.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("yaml error: {0}")]
    Yaml(String),

    #[error("unknown field '{field}' at {path}")]
    UnknownField { path: String, field: String },

    #[error("schema error at {path}: {message}")]
    Schema { path: String, message: String },

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Reference(#[from] RegistryError),
}

impl ParseError {
    fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse entry points
// ---------------------------------------------------------------------------

const TOP_LEVEL_KEYS: &[&str] = &["version", "name", "description", "icon", "inputs", "steps"];

const COMMON_STEP_KEYS: &[&str] = &[
    "name",
    "type",
    "if",
    "continue_on_error",
    "retry",
    "rollback",
];

fn variant_keys(step_type: &str) -> Option<&'static [&'static str]> {
    match step_type {
        "python" => Some(&["action", "args", "kwargs"]),
        "agent" => Some(&["agent", "context"]),
        "generate" => Some(&["generator", "context"]),
        "validate" => Some(&["stages"]),
        "subworkflow" => Some(&["workflow", "inputs"]),
        "branch" => Some(&["options"]),
        "parallel" => Some(&["steps", "for_each"]),
        "loop" => Some(&["for_each", "until", "max_iterations", "parallel", "steps"]),
        "checkpoint" => Some(&["checkpoint_id"]),
        _ => None,
    }
}

/// Parse a workflow YAML document into a validated [`WorkflowFile`].
pub fn parse_workflow(yaml: &str) -> Result<WorkflowFile, ParseError> {
    let doc: serde_yaml_ng::Value =
        serde_yaml_ng::from_str(yaml).map_err(|e| ParseError::Yaml(e.to_string()))?;

    check_document_structure(&doc)?;

    let workflow: WorkflowFile =
        serde_yaml_ng::from_value(doc).map_err(|e| ParseError::Yaml(e.to_string()))?;

    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Parse and, for strict registries, verify that every referenced
/// component exists.
pub fn parse_workflow_with_registry(
    yaml: &str,
    registry: &ComponentRegistry,
) -> Result<WorkflowFile, ParseError> {
    let workflow = parse_workflow(yaml)?;
    if registry.is_strict() {
        validate_references(&workflow, registry)?;
    }
    Ok(workflow)
}

// ---------------------------------------------------------------------------
// Structural checks (raw document)
// ---------------------------------------------------------------------------

fn check_document_structure(doc: &serde_yaml_ng::Value) -> Result<(), ParseError> {
    let mapping = doc
        .as_mapping()
        .ok_or_else(|| ParseError::schema("<root>", "workflow document must be a mapping"))?;

    for key in mapping.keys() {
        let key = key.as_str().unwrap_or("<non-string>");
        if !TOP_LEVEL_KEYS.contains(&key) {
            return Err(ParseError::UnknownField {
                path: "<root>".to_string(),
                field: key.to_string(),
            });
        }
    }

    if let Some(steps) = doc.get("steps") {
        let steps = steps
            .as_sequence()
            .ok_or_else(|| ParseError::schema("steps", "steps must be a sequence"))?;
        for (index, step) in steps.iter().enumerate() {
            check_step_structure(step, &format!("steps[{index}]"))?;
        }
    }

    Ok(())
}

fn check_step_structure(step: &serde_yaml_ng::Value, path: &str) -> Result<(), ParseError> {
    let mapping = step
        .as_mapping()
        .ok_or_else(|| ParseError::schema(path, "step must be a mapping"))?;

    let step_type = step
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ParseError::schema(path, "step is missing a 'type' field"))?;

    let allowed = variant_keys(step_type).ok_or_else(|| {
        ParseError::schema(path, format!("unknown step type '{step_type}'"))
    })?;

    for key in mapping.keys() {
        let key = key.as_str().unwrap_or("<non-string>");
        if !COMMON_STEP_KEYS.contains(&key) && !allowed.contains(&key) {
            return Err(ParseError::UnknownField {
                path: path.to_string(),
                field: key.to_string(),
            });
        }
    }

    // Recurse into nested step containers
    if let Some(nested) = step.get("steps").and_then(|v| v.as_sequence()) {
        for (index, child) in nested.iter().enumerate() {
            check_step_structure(child, &format!("{path}.steps[{index}]"))?;
        }
    }
    if let Some(options) = step.get("options").and_then(|v| v.as_sequence()) {
        for (index, option) in options.iter().enumerate() {
            let option_path = format!("{path}.options[{index}]");
            let keys = option
                .as_mapping()
                .ok_or_else(|| ParseError::schema(&option_path, "option must be a mapping"))?
                .keys();
            for key in keys {
                let key = key.as_str().unwrap_or("<non-string>");
                if key != "when" && key != "step" {
                    return Err(ParseError::UnknownField {
                        path: option_path.clone(),
                        field: key.to_string(),
                    });
                }
            }
            if let Some(inner) = option.get("step") {
                check_step_structure(inner, &format!("{option_path}.step"))?;
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Semantic validation (parsed workflow)
// ---------------------------------------------------------------------------

/// Validate structural invariants on a parsed workflow.
pub fn validate_workflow(workflow: &WorkflowFile) -> Result<(), ParseError> {
    if workflow.name.is_empty() {
        return Err(ParseError::schema("name", "workflow name must not be empty"));
    }
    if workflow.steps.is_empty() {
        return Err(ParseError::schema(
            "steps",
            "workflow must have at least one step",
        ));
    }

    validate_step_container(&workflow.steps, "steps")?;

    // Every embedded expression must parse
    let mut syntax_error = None;
    walk_strings(workflow, &mut |path, text| {
        if syntax_error.is_none() && text.contains("${{") {
            if let Err(error) = expression::extract_all(text) {
                syntax_error = Some((path.to_string(), error));
            }
        }
    });
    if let Some((_, error)) = syntax_error {
        return Err(ParseError::Expression(error));
    }

    Ok(())
}

fn validate_step_container(steps: &[StepRecord], path: &str) -> Result<(), ParseError> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.name.is_empty() {
            return Err(ParseError::schema(path, "step name must not be empty"));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(ParseError::schema(
                path,
                format!("duplicate step name '{}'", step.name),
            ));
        }
        validate_step(step, &format!("{path}.{}", step.name))?;
    }
    Ok(())
}

fn validate_step(step: &StepRecord, path: &str) -> Result<(), ParseError> {
    match &step.kind {
        StepKind::Loop {
            for_each,
            until,
            max_iterations,
            parallel,
            steps,
        } => {
            if until.is_some() && for_each.is_some() {
                return Err(ParseError::schema(
                    path,
                    "'until' and 'for_each' are mutually exclusive",
                ));
            }
            if until.is_none() && for_each.is_none() {
                return Err(ParseError::schema(
                    path,
                    "loop requires either 'for_each' or 'until'",
                ));
            }
            if until.is_some() && *parallel {
                return Err(ParseError::schema(
                    path,
                    "'parallel: true' is incompatible with 'until'",
                ));
            }
            if *max_iterations == 0 {
                return Err(ParseError::schema(path, "max_iterations must be >= 1"));
            }
            if steps.is_empty() {
                return Err(ParseError::schema(path, "loop requires at least one step"));
            }
            validate_step_container(steps, path)?;
        }
        StepKind::Parallel { steps, for_each } => {
            if steps.is_empty() && for_each.is_none() {
                return Err(ParseError::schema(
                    path,
                    "parallel requires nested steps or for_each",
                ));
            }
            validate_step_container(steps, path)?;
        }
        StepKind::Branch { options } => {
            if options.is_empty() {
                return Err(ParseError::schema(path, "branch requires at least one option"));
            }
            for option in options {
                validate_step(&option.step, &format!("{path}.{}", option.step.name))?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Verify every component reference resolves in the registry.
pub fn validate_references(
    workflow: &WorkflowFile,
    registry: &ComponentRegistry,
) -> Result<(), ParseError> {
    for step in &workflow.steps {
        validate_step_references(step, registry)?;
    }
    Ok(())
}

fn validate_step_references(
    step: &StepRecord,
    registry: &ComponentRegistry,
) -> Result<(), ParseError> {
    if let Some(rollback) = &step.rollback {
        registry.actions.get(rollback)?;
    }
    match &step.kind {
        StepKind::Python { action, .. } => {
            registry.actions.get(action)?;
        }
        StepKind::Agent { agent, context } => {
            registry.agents.get(agent)?;
            if let ContextSpec::Builder(builder) = context {
                registry.context_builders.get(builder)?;
            }
        }
        StepKind::Generate { generator, context } => {
            registry.generators.get(generator)?;
            if let ContextSpec::Builder(builder) = context {
                registry.context_builders.get(builder)?;
            }
        }
        StepKind::Subworkflow { workflow, .. } => {
            registry.workflows.get(workflow)?;
        }
        StepKind::Branch { options } => {
            for option in options {
                validate_step_references(&option.step, registry)?;
            }
        }
        StepKind::Parallel { steps, .. } | StepKind::Loop { steps, .. } => {
            for nested in steps {
                validate_step_references(nested, registry)?;
            }
        }
        StepKind::Validate { .. } | StepKind::Checkpoint { .. } => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Expression extraction
// ---------------------------------------------------------------------------

/// Yield every `${{ … }}` fragment found in a workflow, in document order.
pub fn extract_expressions(workflow: &WorkflowFile) -> Result<Vec<Expression>, ExpressionError> {
    let mut expressions = Vec::new();
    let mut failure = None;
    walk_strings(workflow, &mut |_, text| {
        if failure.is_some() || !text.contains("${{") {
            return;
        }
        match expression::extract_all(text) {
            Ok(found) => expressions.extend(found),
            Err(error) => failure = Some(error),
        }
    });
    match failure {
        Some(error) => Err(error),
        None => Ok(expressions),
    }
}

/// Visit every string field of a workflow that may carry expressions.
fn walk_strings(workflow: &WorkflowFile, visit: &mut impl FnMut(&str, &str)) {
    for step in &workflow.steps {
        walk_step_strings(step, "steps", visit);
    }
}

fn walk_value_strings(value: &serde_json::Value, path: &str, visit: &mut impl FnMut(&str, &str)) {
    match value {
        serde_json::Value::String(s) => visit(path, s),
        serde_json::Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                walk_value_strings(item, &format!("{path}[{index}]"), visit);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                walk_value_strings(item, &format!("{path}.{key}"), visit);
            }
        }
        _ => {}
    }
}

fn walk_step_strings(step: &StepRecord, parent: &str, visit: &mut impl FnMut(&str, &str)) {
    let path = format!("{parent}.{}", step.name);
    if let Some(condition) = &step.condition {
        visit(&format!("{path}.if"), condition);
    }
    match &step.kind {
        StepKind::Python { args, kwargs, .. } => {
            for (index, arg) in args.iter().enumerate() {
                walk_value_strings(arg, &format!("{path}.args[{index}]"), visit);
            }
            for (key, value) in kwargs {
                walk_value_strings(value, &format!("{path}.kwargs.{key}"), visit);
            }
        }
        StepKind::Agent { context, .. } | StepKind::Generate { context, .. } => {
            if let ContextSpec::Inline(map) = context {
                for (key, value) in map {
                    walk_value_strings(value, &format!("{path}.context.{key}"), visit);
                }
            }
        }
        StepKind::Validate { stages } => {
            if let StagesSpec::Expression(text) = stages {
                visit(&format!("{path}.stages"), text);
            }
        }
        StepKind::Subworkflow { inputs, .. } => {
            for (key, value) in inputs {
                walk_value_strings(value, &format!("{path}.inputs.{key}"), visit);
            }
        }
        StepKind::Branch { options } => {
            for (index, option) in options.iter().enumerate() {
                visit(&format!("{path}.options[{index}].when"), &option.when);
                walk_step_strings(&option.step, &format!("{path}.options[{index}]"), visit);
            }
        }
        StepKind::Parallel { steps, for_each } => {
            if let Some(text) = for_each {
                visit(&format!("{path}.for_each"), text);
            }
            for nested in steps {
                walk_step_strings(nested, &path, visit);
            }
        }
        StepKind::Loop {
            for_each,
            until,
            steps,
            ..
        } => {
            if let Some(text) = for_each {
                visit(&format!("{path}.for_each"), text);
            }
            if let Some(text) = until {
                visit(&format!("{path}.until"), text);
            }
            for nested in steps {
                walk_step_strings(nested, &path, visit);
            }
        }
        StepKind::Checkpoint { checkpoint_id } => {
            if let Some(text) = checkpoint_id {
                visit(&format!("{path}.checkpoint_id"), text);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
