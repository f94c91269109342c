//! Server-sent events framing and OpenAI-style chunk decoding.

use crate::{
    error::provider_message,
    types::{StreamEvent, Usage},
};

/// One decoded `data:` payload.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    Events(Vec<StreamEvent>),
    /// The provider reported a failure inside an otherwise successful response.
    Error(String),
    Done,
}

/// Splits a byte stream into lines, keeping partial lines (and partial UTF-8
/// sequences) until the rest arrives.
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    /// Whatever is left once the stream ends without a final newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buf))
            .trim()
            .to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Decode a single SSE line. Comments, blank lines, other fields and
/// unparseable payloads produce `None`.
pub(crate) fn parse_line(line: &str) -> Option<Frame> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(Frame::Done);
    }
    let chunk: serde_json::Value = serde_json::from_str(data).ok()?;
    if chunk.get("error").is_some_and(|e| !e.is_null()) {
        return Some(Frame::Error(provider_message(data)));
    }
    Some(Frame::Events(chunk_events(&chunk)))
}

fn chunk_events(chunk: &serde_json::Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let delta = &chunk["choices"][0]["delta"];

    if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|s| !s.is_empty()) {
        events.push(StreamEvent::Reasoning(reasoning.to_string()));
    }
    if let Some(text) = delta["content"].as_str().filter(|s| !s.is_empty()) {
        events.push(StreamEvent::Text(text.to_string()));
    }
    // Sent with stream_options.include_usage, usually in the last chunk.
    if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
        events.push(StreamEvent::Usage(Usage {
            input_tokens: token_count(&usage["prompt_tokens"]),
            output_tokens: token_count(&usage["completion_tokens"]),
        }));
    }
    events
}

fn token_count(value: &serde_json::Value) -> u32 {
    value
        .as_u64()
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}
