//! Workflow discovery: scan builtin, user, and project roots for workflow
//! and fragment YAML files.
//!
//! Each root contributes `*.yaml` workflows directly and fragments under a
//! `fragments/` subdirectory. Layers are applied in precedence order
//! PROJECT > USER > BUILTIN: a higher-precedence file with the same
//! workflow name wins, and the paths it shadowed are recorded on the
//! discovered value for diagnostics. Files that fail to parse are
//! collected as skipped, never raised.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use maverick_types::workflow::WorkflowFile;

use super::parser;
use super::registry::{ComponentRegistry, RegistryError};

/// Which root a discovered workflow came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkflowSource {
    Builtin,
    User,
    Project,
}

impl WorkflowSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowSource::Builtin => "builtin",
            WorkflowSource::User => "user",
            WorkflowSource::Project => "project",
        }
    }
}

/// A workflow or fragment found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredWorkflow {
    pub workflow: Arc<WorkflowFile>,
    pub source: WorkflowSource,
    pub path: PathBuf,
    /// Lower-precedence files this definition shadowed.
    pub overrides: Vec<PathBuf>,
}

/// A file that was found but not parsed.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// The outcome of a discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub workflows: Vec<DiscoveredWorkflow>,
    pub fragments: Vec<DiscoveredWorkflow>,
    pub locations_scanned: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
}

/// Scans configured roots for workflow definitions.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDiscovery {
    builtin_dir: Option<PathBuf>,
    user_dir: Option<PathBuf>,
    project_dir: Option<PathBuf>,
}

impl WorkflowDiscovery {
    pub fn new(
        builtin_dir: Option<PathBuf>,
        user_dir: Option<PathBuf>,
        project_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            builtin_dir,
            user_dir,
            project_dir,
        }
    }

    /// Discovery over the conventional roots for a project directory:
    /// `<config>/maverick/workflows` for the user layer and
    /// `<project>/.maverick/workflows` for the project layer.
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            builtin_dir: None,
            user_dir: dirs::config_dir().map(|d| d.join("maverick").join("workflows")),
            project_dir: Some(project_root.join(".maverick").join("workflows")),
        }
    }

    /// Run discovery over all configured roots.
    pub fn discover(&self) -> DiscoveryResult {
        let mut result = DiscoveryResult::default();
        // BTreeMaps keyed by workflow name; later (higher-precedence)
        // layers replace earlier entries and accumulate their paths.
        let mut workflows: BTreeMap<String, DiscoveredWorkflow> = BTreeMap::new();
        let mut fragments: BTreeMap<String, DiscoveredWorkflow> = BTreeMap::new();

        let layers = [
            (WorkflowSource::Builtin, self.builtin_dir.as_deref()),
            (WorkflowSource::User, self.user_dir.as_deref()),
            (WorkflowSource::Project, self.project_dir.as_deref()),
        ];

        for (source, dir) in layers {
            let Some(dir) = dir else { continue };
            result.locations_scanned.push(dir.to_path_buf());

            for path in scan_yaml_files(dir) {
                load_layer_file(&path, source, &mut workflows, &mut result.skipped);
            }
            let fragment_dir = dir.join("fragments");
            for path in scan_yaml_files(&fragment_dir) {
                load_layer_file(&path, source, &mut fragments, &mut result.skipped);
            }
        }

        result.workflows = workflows.into_values().collect();
        result.fragments = fragments.into_values().collect();

        tracing::info!(
            workflows = result.workflows.len(),
            fragments = result.fragments.len(),
            skipped = result.skipped.len(),
            "workflow discovery complete"
        );
        result
    }
}

fn load_layer_file(
    path: &Path,
    source: WorkflowSource,
    table: &mut BTreeMap<String, DiscoveredWorkflow>,
    skipped: &mut Vec<SkippedFile>,
) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            skipped.push(SkippedFile {
                path: path.to_path_buf(),
                reason: format!("read error: {error}"),
            });
            return;
        }
    };

    match parser::parse_workflow(&content) {
        Ok(workflow) => {
            let name = workflow.name.clone();
            let mut overrides = Vec::new();
            if let Some(previous) = table.remove(&name) {
                tracing::debug!(
                    name = name.as_str(),
                    winner = source.as_str(),
                    shadowed = previous.source.as_str(),
                    "workflow overridden by higher-precedence layer"
                );
                overrides.extend(previous.overrides);
                overrides.push(previous.path);
            }
            table.insert(
                name,
                DiscoveredWorkflow {
                    workflow: Arc::new(workflow),
                    source,
                    path: path.to_path_buf(),
                    overrides,
                },
            );
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "skipping unparseable workflow file");
            skipped.push(SkippedFile {
                path: path.to_path_buf(),
                reason: error.to_string(),
            });
        }
    }
}

/// `*.yaml` files directly in `dir`, sorted for determinism. Missing or
/// unreadable directories yield an empty list.
fn scan_yaml_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "workflow directory not present");
        return Vec::new();
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::warn!(dir = %dir.display(), "cannot read workflow directory");
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    files.sort();
    files
}

/// Register every discovered workflow and fragment into the workflows
/// namespace, so a sub-workflow step resolves identically regardless of
/// source.
pub fn load_into_registry(
    result: &DiscoveryResult,
    registry: &mut ComponentRegistry,
) -> Result<(), RegistryError> {
    for discovered in result.workflows.iter().chain(result.fragments.iter()) {
        registry
            .workflows
            .register(discovered.workflow.name.clone(), discovered.workflow.clone())?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn write_workflow(dir: &Path, file: &str, name: &str, description: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let yaml = format!(
            r#"
version: "1.0"
name: {name}
description: {description}
steps:
  - name: noop
    type: python
    action: noop
"#
        );
        std::fs::write(dir.join(file), yaml).unwrap();
    }

    #[test]
    fn discovers_workflows_and_fragments() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("project");
        write_workflow(&project, "build.yaml", "build", "project build");
        write_workflow(&project.join("fragments"), "helper.yaml", "helper", "frag");

        let discovery = WorkflowDiscovery::new(None, None, Some(project.clone()));
        let result = discovery.discover();

        assert_eq!(result.workflows.len(), 1);
        assert_eq!(result.fragments.len(), 1);
        assert_eq!(result.workflows[0].workflow.name, "build");
        assert_eq!(result.fragments[0].workflow.name, "helper");
        assert_eq!(result.locations_scanned, vec![project]);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn project_overrides_user_and_records_shadowed_path() {
        let root = tempfile::tempdir().unwrap();
        let user = root.path().join("user");
        let project = root.path().join("project");
        write_workflow(&user, "build.yaml", "build", "user version");
        write_workflow(&project, "build.yaml", "build", "project version");

        let discovery = WorkflowDiscovery::new(None, Some(user.clone()), Some(project));
        let result = discovery.discover();

        assert_eq!(result.workflows.len(), 1);
        let discovered = &result.workflows[0];
        assert_eq!(discovered.source, WorkflowSource::Project);
        assert_eq!(discovered.workflow.description, "project version");
        assert_eq!(discovered.overrides, vec![user.join("build.yaml")]);
    }

    #[test]
    fn user_overrides_builtin() {
        let root = tempfile::tempdir().unwrap();
        let builtin = root.path().join("builtin");
        let user = root.path().join("user");
        write_workflow(&builtin, "release.yaml", "release", "builtin version");
        write_workflow(&user, "release.yaml", "release", "user version");

        let discovery = WorkflowDiscovery::new(Some(builtin.clone()), Some(user), None);
        let result = discovery.discover();

        let discovered = &result.workflows[0];
        assert_eq!(discovered.source, WorkflowSource::User);
        assert_eq!(discovered.workflow.description, "user version");
        assert_eq!(discovered.overrides, vec![builtin.join("release.yaml")]);
    }

    #[test]
    fn fragment_override_follows_same_precedence() {
        let root = tempfile::tempdir().unwrap();
        let user = root.path().join("user");
        let project = root.path().join("project");
        write_workflow(&user.join("fragments"), "frag.yaml", "frag", "user");
        write_workflow(&project.join("fragments"), "frag.yaml", "frag", "project");

        let discovery = WorkflowDiscovery::new(None, Some(user.clone()), Some(project));
        let result = discovery.discover();

        assert_eq!(result.fragments.len(), 1);
        let discovered = &result.fragments[0];
        assert_eq!(discovered.source, WorkflowSource::Project);
        assert_eq!(
            discovered.overrides,
            vec![user.join("fragments").join("frag.yaml")]
        );
    }

    #[test]
    fn parse_failures_are_collected_not_raised() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("project");
        write_workflow(&project, "good.yaml", "good", "fine");
        std::fs::write(project.join("broken.yaml"), "key: [unclosed").unwrap();
        // Valid YAML that is not a workflow
        std::fs::write(project.join("config.yaml"), "just: a-config").unwrap();

        let discovery = WorkflowDiscovery::new(None, None, Some(project));
        let result = discovery.discover();

        assert_eq!(result.workflows.len(), 1);
        assert_eq!(result.skipped.len(), 2);
    }

    #[test]
    fn missing_directories_are_harmless() {
        let discovery = WorkflowDiscovery::new(
            Some(PathBuf::from("/nonexistent/builtin")),
            None,
            Some(PathBuf::from("/nonexistent/project")),
        );
        let result = discovery.discover();
        assert!(result.workflows.is_empty());
        assert_eq!(result.locations_scanned.len(), 2);
    }

    #[test]
    fn load_into_registry_registers_workflows_and_fragments() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("project");
        write_workflow(&project, "build.yaml", "build", "wf");
        write_workflow(&project.join("fragments"), "helper.yaml", "helper", "frag");

        let discovery = WorkflowDiscovery::new(None, None, Some(project));
        let result = discovery.discover();

        let mut registry = ComponentRegistry::new();
        load_into_registry(&result, &mut registry).unwrap();

        assert!(registry.workflows.has("build"));
        assert!(registry.workflows.has("helper"));
    }

    #[test]
    fn non_yaml_files_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("project");
        write_workflow(&project, "build.yaml", "build", "wf");
        std::fs::write(project.join("notes.txt"), "not yaml").unwrap();
        std::fs::write(project.join("build.yml"), "also: ignored").unwrap();

        let discovery = WorkflowDiscovery::new(None, None, Some(project));
        let result = discovery.discover();
        assert_eq!(result.workflows.len(), 1);
        assert!(result.skipped.is_empty());
    }
}
