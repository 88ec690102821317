//! Component registry: five named namespaces of executable collaborators.
//!
//! Actions, agents, generators, context builders, and workflows are looked
//! up by name at execution time. Registration is unique-by-name; a missing
//! lookup reports the namespace and every registered name so typos are easy
//! to diagnose.
//!
//! A strict registry (the production default) lets the parser verify
//! references eagerly, before a workflow starts. A lenient registry defers
//! resolution: a dangling reference only fails the affected step at run
//! time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use maverick_types::workflow::WorkflowFile;
use serde_json::Value;

use super::context::WorkflowContext;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// A callable invoked by python steps and rollback compensations.
///
/// Receives the step's resolved positional and keyword arguments. No side
/// effect contract beyond what the workflow author documents.
#[async_trait]
pub trait Action: Send + Sync {
    async fn call(
        &self,
        args: &[Value],
        kwargs: serde_json::Map<String, Value>,
    ) -> anyhow::Result<Value>;
}

/// A long-running agent invoked by agent steps.
///
/// The streaming handle, when given, lets the agent emit incremental text
/// and tool-call events during execution.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(
        &self,
        context: Value,
        stream: Option<super::streaming::StreamingContext>,
    ) -> anyhow::Result<Value>;
}

/// Factory constructing a fresh agent per step invocation.
pub trait AgentFactory: Send + Sync {
    fn create(&self) -> Box<dyn Agent>;
}

impl<F> AgentFactory for F
where
    F: Fn() -> Box<dyn Agent> + Send + Sync,
{
    fn create(&self) -> Box<dyn Agent> {
        self()
    }
}

/// A text generator invoked by generate steps.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, context: Value) -> anyhow::Result<String>;
}

/// Factory constructing a fresh generator per step invocation.
pub trait GeneratorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Generator>;
}

impl<F> GeneratorFactory for F
where
    F: Fn() -> Box<dyn Generator> + Send + Sync,
{
    fn create(&self) -> Box<dyn Generator> {
        self()
    }
}

/// Builds an agent or generator context from resolved step inputs and the
/// live workflow context.
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn build(
        &self,
        resolved: &serde_json::Map<String, Value>,
        context: &WorkflowContext,
    ) -> anyhow::Result<Value>;
}

/// Adapter turning a plain closure into an [`Action`].
///
/// Convenient for registering library actions and test stubs:
///
/// ```ignore
/// registry.actions.register("double", Arc::new(FnAction::new(|_, kwargs| {
///     let n = kwargs["n"].as_i64().unwrap_or(0);
///     Ok(serde_json::json!(n * 2))
/// })))?;
/// ```
pub struct FnAction<F>(F);

impl<F> FnAction<F>
where
    F: Fn(&[Value], serde_json::Map<String, Value>) -> anyhow::Result<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&[Value], serde_json::Map<String, Value>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(
        &self,
        args: &[Value],
        kwargs: serde_json::Map<String, Value>,
    ) -> anyhow::Result<Value> {
        (self.0)(args, kwargs)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by registry operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The same name was registered twice in one namespace.
    #[error("{namespace} '{name}' is already registered")]
    DuplicateComponent { namespace: &'static str, name: String },

    /// A referenced component does not exist in its namespace.
    #[error("{namespace} '{name}' not found; available: [{}]", .available.join(", "))]
    ReferenceResolution {
        namespace: &'static str,
        name: String,
        available: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// A unique-by-name map of components of one kind.
pub struct Namespace<T> {
    kind: &'static str,
    entries: HashMap<String, T>,
}

impl<T: Clone> Namespace<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Register a component under a unique name.
    pub fn register(&mut self, name: impl Into<String>, value: T) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateComponent {
                namespace: self.kind,
                name,
            });
        }
        self.entries.insert(name, value);
        Ok(())
    }

    /// Look up a component by name.
    pub fn get(&self, name: &str) -> Result<T, RegistryError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ReferenceResolution {
                namespace: self.kind,
                name: name.to_string(),
                available: self.list_names(),
            })
    }

    /// All registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> std::fmt::Debug for Namespace<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("kind", &self.kind)
            .field("len", &self.entries.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Aggregate of the five component namespaces.
#[derive(Debug)]
pub struct ComponentRegistry {
    pub actions: Namespace<Arc<dyn Action>>,
    pub agents: Namespace<Arc<dyn AgentFactory>>,
    pub generators: Namespace<Arc<dyn GeneratorFactory>>,
    pub context_builders: Namespace<Arc<dyn ContextBuilder>>,
    pub workflows: Namespace<Arc<WorkflowFile>>,
    strict: bool,
}

impl ComponentRegistry {
    /// A strict registry: the parser validates references eagerly.
    pub fn new() -> Self {
        Self::with_strictness(true)
    }

    /// A lenient registry: dangling references fail at the affected step.
    pub fn lenient() -> Self {
        Self::with_strictness(false)
    }

    fn with_strictness(strict: bool) -> Self {
        Self {
            actions: Namespace::new("action"),
            agents: Namespace::new("agent"),
            generators: Namespace::new("generator"),
            context_builders: Namespace::new("context builder"),
            workflows: Namespace::new("workflow"),
            strict,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_action() -> Arc<dyn Action> {
        Arc::new(FnAction::new(|_, _| Ok(Value::Null)))
    }

    // -----------------------------------------------------------------------
    // Namespace behaviour
    // -----------------------------------------------------------------------

    #[test]
    fn register_and_get() {
        let mut registry = ComponentRegistry::new();
        registry.actions.register("noop", noop_action()).unwrap();

        assert!(registry.actions.has("noop"));
        assert!(registry.actions.get("noop").is_ok());
        assert_eq!(registry.actions.len(), 1);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ComponentRegistry::new();
        registry.actions.register("noop", noop_action()).unwrap();

        let err = registry.actions.register("noop", noop_action()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateComponent { .. }));
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn missing_lookup_lists_available_names() {
        let mut registry = ComponentRegistry::new();
        registry.actions.register("alpha", noop_action()).unwrap();
        registry.actions.register("beta", noop_action()).unwrap();

        let err = match registry.actions.get("gamma") {
            Err(err) => err,
            Ok(_) => panic!("expected reference error, got Ok"),
        };
        match &err {
            RegistryError::ReferenceResolution {
                namespace,
                name,
                available,
            } => {
                assert_eq!(*namespace, "action");
                assert_eq!(name, "gamma");
                assert_eq!(available, &["alpha", "beta"]);
            }
            other => panic!("expected reference error, got {other:?}"),
        }
        assert!(err.to_string().contains("alpha, beta"));
    }

    #[test]
    fn list_names_is_sorted() {
        let mut registry = ComponentRegistry::new();
        registry.actions.register("zeta", noop_action()).unwrap();
        registry.actions.register("alpha", noop_action()).unwrap();
        assert_eq!(registry.actions.list_names(), vec!["alpha", "zeta"]);
    }

    // -----------------------------------------------------------------------
    // Strictness flag
    // -----------------------------------------------------------------------

    #[test]
    fn strict_is_the_default() {
        assert!(ComponentRegistry::new().is_strict());
        assert!(ComponentRegistry::default().is_strict());
        assert!(!ComponentRegistry::lenient().is_strict());
    }

    // -----------------------------------------------------------------------
    // FnAction adapter
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn fn_action_invokes_closure() {
        let action = FnAction::new(|_, kwargs: serde_json::Map<String, Value>| {
            let n = kwargs["n"].as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        });

        let mut kwargs = serde_json::Map::new();
        kwargs.insert("n".to_string(), json!(21));
        let out = action.call(&[], kwargs).await.unwrap();
        assert_eq!(out, json!(42));
    }

    // -----------------------------------------------------------------------
    // Factory closures
    // -----------------------------------------------------------------------

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        async fn execute(
            &self,
            context: Value,
            _stream: Option<super::super::streaming::StreamingContext>,
        ) -> anyhow::Result<Value> {
            Ok(context)
        }
    }

    #[tokio::test]
    async fn agent_factory_from_closure() {
        let mut registry = ComponentRegistry::new();
        let factory: Arc<dyn AgentFactory> =
            Arc::new(|| Box::new(EchoAgent) as Box<dyn Agent>);
        registry.agents.register("echo", factory).unwrap();

        let agent = registry.agents.get("echo").unwrap().create();
        let out = agent.execute(json!({"k": 1}), None).await.unwrap();
        assert_eq!(out, json!({"k": 1}));
    }
}
