//! Session journal: append-only JSONL record of a workflow run.
//!
//! Purely an observer on the event stream. Each line is a self-contained
//! JSON object with an `event` tag and a `ts` Unix timestamp. The first
//! line is always `session_start` and the last is `session_end`; every
//! line is flushed as it is written so a crash loses at most the line in
//! flight.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use maverick_types::event::ProgressEvent;
use serde_json::Value;

/// Append-only JSONL writer for workflow progress events.
///
/// High-volume `AgentStreamChunk` events can be filtered at the sink by
/// constructing the journal with `include_agent_text = false`.
pub struct SessionJournal {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    include_agent_text: bool,
    event_count: u64,
}

impl SessionJournal {
    /// Open (or append to) the journal file, creating parent directories.
    pub fn open(path: impl Into<PathBuf>, include_agent_text: bool) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::options().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "session journal opened");
        Ok(Self {
            path,
            file: Some(BufWriter::new(file)),
            include_agent_text,
            event_count: 0,
        })
    }

    fn now_ts() -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }

    fn write_line(&mut self, value: &Value) -> std::io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        serde_json::to_writer(&mut *file, value)?;
        file.write_all(b"\n")?;
        // Flush after each line so the journal is crash-safe
        file.flush()
    }

    /// Write the `session_start` header. Call once, before any events.
    pub fn write_header(
        &mut self,
        workflow_name: &str,
        inputs: &serde_json::Map<String, Value>,
    ) -> std::io::Result<()> {
        let header = serde_json::json!({
            "event": "session_start",
            "ts": Self::now_ts(),
            "workflow_name": workflow_name,
            "inputs": inputs,
        });
        self.write_line(&header)
    }

    /// Serialize and append one progress event.
    pub fn record(&mut self, event: &ProgressEvent) -> std::io::Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        if !self.include_agent_text
            && matches!(event, ProgressEvent::AgentStreamChunk { .. })
        {
            return Ok(());
        }

        let mut value = serde_json::to_value(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Value::Object(map) = &mut value {
            map.insert("ts".to_string(), serde_json::json!(Self::now_ts()));
        }
        self.write_line(&value)?;
        self.event_count += 1;
        Ok(())
    }

    /// Write the `session_end` footer with arbitrary summary fields.
    pub fn write_summary(
        &mut self,
        summary: serde_json::Map<String, Value>,
    ) -> std::io::Result<()> {
        let mut footer = serde_json::Map::new();
        footer.insert("event".to_string(), serde_json::json!("session_end"));
        footer.insert("ts".to_string(), serde_json::json!(Self::now_ts()));
        footer.insert("event_count".to_string(), serde_json::json!(self.event_count));
        footer.extend(summary);
        self.write_line(&Value::Object(footer))
    }

    /// Flush and close the backing file. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
            tracing::info!(
                path = %self.path.display(),
                event_count = self.event_count,
                "session journal closed"
            );
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for SessionJournal {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maverick_types::event::ChunkType;
    use maverick_types::workflow::StepType;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn step_started() -> ProgressEvent {
        ProgressEvent::StepStarted {
            step_name: "init".to_string(),
            step_type: StepType::Python,
            step_path: "init".to_string(),
        }
    }

    fn stream_chunk() -> ProgressEvent {
        ProgressEvent::AgentStreamChunk {
            step_name: "implement".to_string(),
            agent_name: "implementer".to_string(),
            text: "token".to_string(),
            chunk_type: ChunkType::Text,
            step_path: "implement".to_string(),
        }
    }

    #[test]
    fn first_line_is_session_start_and_last_is_session_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.jsonl");

        let mut journal = SessionJournal::open(&path, true).unwrap();
        journal.write_header("feature-build", &serde_json::Map::new()).unwrap();
        journal.record(&step_started()).unwrap();
        journal
            .write_summary(serde_json::Map::from_iter([(
                "success".to_string(),
                serde_json::json!(true),
            )]))
            .unwrap();
        journal.close();

        let lines = read_lines(&path);
        assert_eq!(lines.first().unwrap()["event"], "session_start");
        assert_eq!(lines.last().unwrap()["event"], "session_end");
        assert_eq!(lines.last().unwrap()["success"], true);
        assert_eq!(lines.last().unwrap()["event_count"], 1);
    }

    #[test]
    fn every_line_has_event_and_ts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");

        let mut journal = SessionJournal::open(&path, true).unwrap();
        journal.write_header("wf", &serde_json::Map::new()).unwrap();
        journal.record(&step_started()).unwrap();
        journal.record(&stream_chunk()).unwrap();
        journal.write_summary(serde_json::Map::new()).unwrap();
        journal.close();

        for line in read_lines(&path) {
            assert!(line["event"].is_string(), "line missing event: {line}");
            assert!(line["ts"].is_number(), "line missing ts: {line}");
        }
    }

    #[test]
    fn event_fields_survive_serialization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");

        let mut journal = SessionJournal::open(&path, true).unwrap();
        journal.record(&step_started()).unwrap();
        journal.close();

        let lines = read_lines(&path);
        assert_eq!(lines[0]["event"], "step_started");
        assert_eq!(lines[0]["step_name"], "init");
        assert_eq!(lines[0]["step_path"], "init");
        assert_eq!(lines[0]["step_type"], "python");
    }

    #[test]
    fn agent_chunks_can_be_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");

        let mut journal = SessionJournal::open(&path, false).unwrap();
        journal.record(&stream_chunk()).unwrap();
        journal.record(&step_started()).unwrap();
        journal.close();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["event"], "step_started");
        assert_eq!(journal_count(&path), 1);
    }

    fn journal_count(path: &Path) -> usize {
        read_lines(path).len()
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");

        let mut journal = SessionJournal::open(&path, true).unwrap();
        assert!(journal.is_open());
        journal.close();
        journal.close();
        assert!(!journal.is_open());
        // Writes after close are no-ops, not errors
        journal.record(&step_started()).unwrap();
    }
}
