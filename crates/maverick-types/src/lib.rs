//! Shared domain types for the Maverick workflow orchestrator.
//!
//! This crate contains the data model shared across the engine: workflow
//! definitions and step records, progress events, step and run results,
//! checkpoint snapshots, and typed agent contexts.
//!
//! Zero IO dependencies -- only serde, serde_json, uuid, chrono, sha2.

pub mod agent;
pub mod checkpoint;
pub mod event;
pub mod result;
pub mod workflow;
