// ABOUTME: Server-Sent-Events framing for relayed completion streams.
// ABOUTME: Reframes remote line output and worker channel messages into `data: ...\n\n` events.

use serde_json::Value;

pub const DONE_SENTINEL: &str = "[DONE]";
pub const DONE_EVENT: &str = "data: [DONE]\n\n";
pub const EVENT_STREAM: &str = "text/event-stream";

const DATA_PREFIX: &str = "data:";

pub fn data_event(payload: &str) -> String {
    format!("data: {}\n\n", payload)
}

/// Reframe one line of a remote streaming body. Blank lines produce nothing.
pub fn frame_remote_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == DONE_SENTINEL {
        return Some(DONE_EVENT.to_string());
    }
    if line.starts_with("data: ") {
        return Some(format!("{}\n\n", line));
    }
    Some(data_event(line))
}

/// What a message pushed into a worker channel turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerChunk {
    /// Terminal marker; the stream ends here
    Done,
    Event(String),
    /// Nothing to forward
    Ignored,
}

pub fn frame_worker_message(message: &Value) -> WorkerChunk {
    match message {
        Value::Object(map) => {
            if map.get("done").is_some_and(is_truthy) {
                WorkerChunk::Done
            } else {
                WorkerChunk::Event(data_event(&message.to_string()))
            }
        }
        Value::String(text) if text.contains(DATA_PREFIX) => {
            WorkerChunk::Event(format!("{}\n\n", text))
        }
        Value::String(text) => WorkerChunk::Event(data_event(text)),
        Value::Null => WorkerChunk::Ignored,
        other => WorkerChunk::Event(data_event(&other.to_string())),
    }
}

/// JSON truthiness: false, null, 0, "" and empty containers are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Splits an arbitrary byte-chunked body into newline-terminated lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line it completed, without the newline
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(std::mem::take(&mut self.partial));
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Whatever trailed the last newline
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}
