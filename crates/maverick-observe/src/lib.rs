//! Observability setup for Maverick.
//!
//! Structured logging initialization shared by every binary that embeds
//! the engine.

pub mod tracing_setup;
