//! Mermaid flowchart rendering for workflow definitions.
//!
//! Converts a parsed workflow into Mermaid flowchart syntax so definitions
//! can be previewed in Markdown files, documentation sites, and code
//! hosting UIs without running anything.

use maverick_types::workflow::{StepKind, StepRecord, WorkflowFile};

/// Flowchart direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Top-down.
    #[default]
    Td,
    /// Left-right.
    Lr,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Td => "TD",
            Direction::Lr => "LR",
        }
    }
}

/// Render a workflow as a Mermaid flowchart.
///
/// Sequential steps chain from `START` to `END`; branch options fan out
/// with predicate labels and re-join; parallel and loop bodies render as
/// subgraphs.
pub fn to_mermaid(workflow: &WorkflowFile, direction: Direction) -> String {
    let mut lines = Vec::new();
    lines.push(format!("flowchart {}", direction.as_str()));
    if workflow.description.is_empty() {
        lines.push(format!("    %% {}", workflow.name));
    } else {
        lines.push(format!("    %% {}: {}", workflow.name, workflow.description));
    }
    lines.push(String::new());
    lines.push("    START((Start))".to_string());

    for step in &workflow.steps {
        render_node(&mut lines, step, "");
    }

    lines.push("    END((End))".to_string());
    lines.push(String::new());

    let mut previous = "START".to_string();
    for step in &workflow.steps {
        render_edges(&mut lines, step, &previous, "");
        previous = node_id(&step.name, "");
    }
    lines.push(format!("    {previous} --> END"));

    lines.join("\n")
}

fn node_id(name: &str, scope: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if scope.is_empty() {
        cleaned
    } else {
        format!("{scope}_{cleaned}")
    }
}

fn escape_label(label: &str) -> String {
    let label = label
        .replace('"', "'")
        .replace(['[', '{'], "(")
        .replace([']', '}'], ")");
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn shape(step: &StepRecord, scope: &str) -> String {
    let id = node_id(&step.name, scope);
    let label = escape_label(&step.name);
    match step.kind {
        // Decision points render as diamonds
        StepKind::Branch { .. } | StepKind::Validate { .. } => format!("{id}{{{label}}}"),
        _ => format!("{id}[{label}]"),
    }
}

fn render_node(lines: &mut Vec<String>, step: &StepRecord, scope: &str) {
    match &step.kind {
        StepKind::Parallel { steps, .. } | StepKind::Loop { steps, .. } => {
            let id = node_id(&step.name, scope);
            lines.push(format!("    subgraph {id}[{}]", escape_label(&step.name)));
            for nested in steps {
                lines.push(format!("        {}", shape(nested, &id)));
            }
            lines.push("    end".to_string());
        }
        StepKind::Branch { options } => {
            lines.push(format!("    {}", shape(step, scope)));
            for option in options {
                lines.push(format!("    {}", shape(&option.step, scope)));
            }
        }
        _ => lines.push(format!("    {}", shape(step, scope))),
    }
}

fn render_edges(lines: &mut Vec<String>, step: &StepRecord, previous: &str, scope: &str) {
    let id = node_id(&step.name, scope);
    lines.push(format!("    {previous} --> {id}"));

    if let StepKind::Branch { options } = &step.kind {
        for option in options {
            let target = node_id(&option.step.name, scope);
            lines.push(format!(
                "    {id} -->|{}| {target}",
                escape_label(&option.when)
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
