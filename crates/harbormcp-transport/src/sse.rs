//! Server-Sent Events encoding and incremental decoding.
//!
//! Pure, no-I/O SSE codec shared by the HTTP client transport (parsing
//! response streams) and the server (framing outbound streams).
//!
//! Events are sequences of `field: value` lines terminated by a blank line:
//!
//! ```text
//! id: 42
//! event: message
//! data: {"jsonrpc":"2.0", ...}
//!
//! ```

use tracing::warn;

/// A Server-Sent Event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event ID for resumption support
    pub id: Option<String>,
    /// Event type (receivers default to "message")
    pub event: Option<String>,
    /// Event data (multiline data fields are joined with `\n`)
    pub data: String,
    /// Retry interval in milliseconds
    pub retry: Option<u32>,
}

impl SseEvent {
    /// Create an event with just data.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
            retry: None,
        }
    }

    /// Create an event with an id and data.
    pub fn with_id(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            event: None,
            data: data.into(),
            retry: None,
        }
    }

    /// Encode the event to its wire form, including the terminating blank
    /// line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {retry}\n"));
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental SSE decoder fed arbitrary byte chunks.
///
/// A partial trailing line is retained across `feed` calls, so chunk
/// boundaries may fall anywhere. Malformed field lines are dropped with a
/// warning; subsequent well-formed events still parse.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    id: Option<String>,
    event: Option<String>,
    data_lines: Vec<String>,
    retry: Option<u32>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    events.push(event);
                }
            } else {
                self.handle_line(line);
            }
        }
        events
    }

    fn handle_line(&mut self, line: &str) {
        // Comment line
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            // A field name with no colon is a field with an empty value
            None => (line, ""),
        };
        match field {
            "id" => self.id = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "retry" => match value.parse() {
                Ok(ms) => self.retry = Some(ms),
                Err(_) => warn!(value, "dropping SSE retry field with non-integer value"),
            },
            other => warn!(field = other, "dropping unknown SSE field"),
        }
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() && self.id.is_none() && self.event.is_none() {
            // Blank line with no pending fields: stream keep-alive
            return None;
        }
        let event = SseEvent {
            id: self.id.take(),
            event: self.event.take(),
            data: self.data_lines.join("\n"),
            retry: self.retry.take(),
        };
        self.data_lines.clear();
        Some(event)
    }
}
