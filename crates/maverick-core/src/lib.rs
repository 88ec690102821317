//! Workflow engine for the Maverick developer-workflow orchestrator.
//!
//! This crate contains the engine proper: the expression evaluator, the
//! component registry and discovery layer, the workflow parser, the
//! checkpoint store, the step handlers and executor, and the event
//! plumbing (path prefixing, broadcast stream, session journal). Outer
//! surfaces -- CLI, TUI, concrete agents, tool wrappers -- live elsewhere
//! and talk to the engine through the registry and the collaborator
//! traits.

pub mod dsl;

pub use dsl::executor::{ExecutorError, StepError, WorkflowExecutor};
pub use dsl::registry::ComponentRegistry;
