//! Checkpoint data: the persisted snapshot of a run at a named boundary.
//!
//! One checkpoint is one JSON document at
//! `<root>/<workflow_name>/<checkpoint_id>.json`. The `inputs_hash` is the
//! resume key: on resume the caller recomputes the digest of the current
//! inputs and a mismatch forces a fresh start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the input digest.
const INPUTS_HASH_LEN: usize = 16;

/// Minimal per-step record persisted in a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResultRecord {
    pub name: String,
    pub output: Value,
}

/// A persisted workflow state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Stable identifier of the boundary within a workflow version.
    pub checkpoint_id: String,
    pub workflow_name: String,
    /// 16-hex-char digest of the run inputs; the resume key.
    pub inputs_hash: String,
    /// Results of every step completed before the checkpoint, in order.
    pub step_results: Vec<StepResultRecord>,
    /// UTC timestamp of the save.
    pub saved_at: DateTime<Utc>,
}

/// Compute the resume key for a set of workflow inputs.
///
/// The digest is SHA-256 over the canonical JSON serialisation of the
/// inputs (sorted keys, no whitespace), truncated to 16 hex characters.
/// `serde_json` object maps sort their keys, so serialising the map
/// directly is canonical.
pub fn compute_inputs_hash(inputs: &serde_json::Map<String, Value>) -> String {
    let canonical = serde_json::to_string(&Value::Object(inputs.clone()))
        .unwrap_or_else(|_| String::from("{}"));
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(INPUTS_HASH_LEN);
    for byte in digest.iter().take(INPUTS_HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
