//! SSE (Server-Sent Events) line decoding for streamed completions.
//!
//! Providers frame incremental output as `data: {...}` lines, optionally
//! terminated by `data: [DONE]`. Network reads split those lines at
//! arbitrary byte offsets, so the decoder buffers the incomplete tail of
//! every read (including half of a multi-byte UTF-8 sequence) until the
//! next read completes it.

use serde::de::DeserializeOwned;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::ProviderId;

/// Payload of the sentinel line that ends OpenAI-style streams.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A complete, meaningful SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// The payload of a `data:` line.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental line decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(frame) = parse_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseFrame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    // `event:`, `id:`, `retry:` and `:` comment lines carry nothing we use;
    // the payloads are self-describing.
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(SseFrame::Data(payload.to_string()))
}

/// Parse an SSE data payload into a provider event type.
pub fn parse_sse_data<T: DeserializeOwned>(provider: ProviderId, data: &str) -> ProviderResult<T> {
    serde_json::from_str(data).map_err(|e| ProviderError::decode(provider, e))
}
