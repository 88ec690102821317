//! Event callback plumbing: path prefixing and agent stream shaping.
//!
//! Handlers that run long-lived collaborators accept an `EventCallback`.
//! Enclosing steps wrap the callback with [`prefix_callback`] so every
//! sub-event's `step_path` is rewritten to include the enclosing step.
//! Prefixing composes: a loop wraps its iteration in `[N]`, that wraps the
//! child step name, that wraps the child's own emissions, producing a
//! globally unique tree-structured identifier for every event.
//!
//! [`StreamingContext`] shapes a streaming agent's mixed text and tool-call
//! chunks: a newline is inserted before the first tool call that follows
//! non-whitespace text, and before text that follows a tool call, so
//! downstream renderers never concatenate distinct kinds on one line.
//! Consecutive tool calls get no extra spacing; whitespace-only text does
//! not trigger the transition.

use std::sync::{Arc, Mutex};

use maverick_types::event::{ChunkType, ProgressEvent};

/// Synchronous fan-out point for progress events.
///
/// Callbacks must not block: the executor invokes them inline between
/// suspension points. The usual sink is a send on the executor's
/// broadcast channel.
pub type EventCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Join a path prefix and a child segment with `/`.
pub fn build_path(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}/{name}"),
        _ => name.to_string(),
    }
}

/// Wrap a callback so every step-scoped event is re-rooted under `prefix`.
pub fn prefix_callback(prefix: impl Into<String>, inner: EventCallback) -> EventCallback {
    let prefix = prefix.into();
    Arc::new(move |mut event: ProgressEvent| {
        event.apply_path_prefix(&prefix);
        inner(event);
    })
}

/// A callback that drops every event. Useful for tests and detached runs.
pub fn null_callback() -> EventCallback {
    Arc::new(|_| {})
}

// ---------------------------------------------------------------------------
// StreamingContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastEmission {
    None,
    Text,
    Tool,
}

/// Handle given to streaming agents for emitting incremental output.
///
/// Tracks the last emission kind so text and tool-call chunks never land on
/// the same rendered line. Cloning shares the transition state.
#[derive(Clone)]
pub struct StreamingContext {
    callback: Option<EventCallback>,
    step_name: String,
    agent_name: String,
    last: Arc<Mutex<LastEmission>>,
}

impl StreamingContext {
    pub fn new(
        callback: Option<EventCallback>,
        step_name: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            callback,
            step_name: step_name.into(),
            agent_name: agent_name.into(),
            last: Arc::new(Mutex::new(LastEmission::None)),
        }
    }

    fn emit(&self, text: String, chunk_type: ChunkType) {
        if let Some(callback) = &self.callback {
            callback(ProgressEvent::AgentStreamChunk {
                step_name: self.step_name.clone(),
                agent_name: self.agent_name.clone(),
                text,
                chunk_type,
                step_path: self.step_name.clone(),
            });
        }
    }

    /// Emit a free-form text chunk.
    pub fn emit_text(&self, text: &str) {
        if self.callback.is_none() {
            return;
        }
        let mut last = self.last.lock().expect("stream state poisoned");
        let mut out = String::new();
        if *last == LastEmission::Tool && !text.trim().is_empty() {
            out.push('\n');
        }
        out.push_str(text);
        if !text.trim().is_empty() {
            *last = LastEmission::Text;
        }
        drop(last);
        self.emit(out, ChunkType::Text);
    }

    /// Emit a structured tool-call chunk.
    pub fn emit_tool(&self, tool_name: &str, args: &serde_json::Value) {
        if self.callback.is_none() {
            return;
        }
        let mut last = self.last.lock().expect("stream state poisoned");
        let mut out = String::new();
        if *last == LastEmission::Text {
            out.push('\n');
        }
        out.push_str(&format!(
            "\u{2514} {tool_name}: {}",
            serde_json::to_string(args).unwrap_or_default()
        ));
        *last = LastEmission::Tool;
        drop(last);
        self.emit(out, ChunkType::ToolCall);
    }

    /// Emit a tool-result chunk. Counts as tool output for spacing.
    pub fn emit_tool_result(&self, tool_name: &str, output: &str) {
        if self.callback.is_none() {
            return;
        }
        *self.last.lock().expect("stream state poisoned") = LastEmission::Tool;
        self.emit(format!("{tool_name} \u{2192} {output}"), ChunkType::ToolResult);
    }
}

impl std::fmt::Debug for StreamingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingContext")
            .field("step_name", &self.step_name)
            .field("agent_name", &self.agent_name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
