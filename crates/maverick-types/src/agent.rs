//! Typed agent context shapes.
//!
//! Most agents receive a free-form JSON context. A few well-known agents
//! take a structured context; the agent step handler recognises them and
//! shapes the resolved inline map into the typed form before dispatch.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Structured context for the `implementer` agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementerContext {
    /// Task description file to implement from, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_file: Option<PathBuf>,
    /// Phase label used in progress reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_name: Option<String>,
    /// Branch the implementation lands on.
    #[serde(default)]
    pub branch: String,
    /// Working directory for the agent's tool invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub skip_validation: bool,
    #[serde(default)]
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shapes_from_loose_map() {
        let raw = json!({
            "task_file": "specs/001/tasks.md",
            "branch": "001-x",
            "dry_run": true
        });
        let ctx: ImplementerContext = serde_json::from_value(raw).unwrap();
        assert_eq!(ctx.task_file, Some(PathBuf::from("specs/001/tasks.md")));
        assert_eq!(ctx.branch, "001-x");
        assert!(ctx.dry_run);
        assert!(!ctx.skip_validation);
        assert!(ctx.phase_name.is_none());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let ctx: ImplementerContext = serde_json::from_value(json!({})).unwrap();
        assert!(ctx.task_file.is_none());
        assert_eq!(ctx.branch, "");
    }
}
