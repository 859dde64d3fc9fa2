//! Build output framing.
//!
//! The runtime delivers build output as arbitrary byte chunks. A chunk may end
//! in the middle of a line, a JSON object, or a UTF-8 sequence. [`LogDecoder`]
//! buffers the incomplete tail and only emits whole segments.

use serde::Deserialize;
use std::collections::VecDeque;

/// One decoded unit of build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSegment {
    /// Ordinary output line.
    Line(String),
    /// The builder reported an error.
    Error(String),
    /// Auxiliary metadata (for example the built image id).
    Aux(String),
}

#[derive(Deserialize)]
struct JsonMessage {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
    #[serde(default)]
    aux: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default)]
pub struct LogDecoder {
    pending: Vec<u8>,
}

impl LogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every segment completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<LogSegment> {
        self.pending.extend_from_slice(chunk);

        let mut segments = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            segments.extend(Self::decode(&raw[..raw.len() - 1]));
        }
        segments
    }

    /// Flush whatever is left once the stream has ended.
    ///
    /// A trailing partial segment is decoded as-is; it is never an error.
    pub fn finish(&mut self) -> Vec<LogSegment> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let raw = std::mem::take(&mut self.pending);
        Self::decode(&raw)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn decode(raw: &[u8]) -> Vec<LogSegment> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_end_matches('\r');
        if text.trim().is_empty() {
            return Vec::new();
        }

        let trimmed = text.trim_start();
        if trimmed.starts_with('{') {
            if let Ok(message) = serde_json::from_str::<JsonMessage>(trimmed) {
                return Self::from_json(message);
            }
        }
        vec![LogSegment::Line(text.to_string())]
    }

    fn from_json(message: JsonMessage) -> Vec<LogSegment> {
        if let Some(error) = message
            .error
            .or_else(|| message.error_detail.and_then(|d| d.message))
        {
            return vec![LogSegment::Error(error.trim_end().to_string())];
        }
        if let Some(aux) = message.aux {
            let id = aux
                .get("ID")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| aux.to_string());
            return vec![LogSegment::Aux(id)];
        }
        let text = message.stream.or(message.status).unwrap_or_default();
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| LogSegment::Line(l.to_string()))
            .collect()
    }
}

/// Keeps the last `capacity` lines of output.
#[derive(Debug, Clone)]
pub struct LogTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogTail {
    pub const DEFAULT_CAPACITY: usize = 15;

    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
