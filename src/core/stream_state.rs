//! Per-stream accumulation state.
//!
//! Streaming providers deliver text and tool-call arguments in fragments.
//! [`StreamState`] tracks everything one logical stream has produced so far:
//! accumulated text per content-block index, partial tool-call fragments,
//! buffer accounting, and the bookkeeping the per-provider state machines
//! need (started/closed block indices, captured message id and model).
//!
//! One instance belongs to exactly one stream. Callers either use a fresh
//! state per stream or call [`StreamState::reset_stream_state`] between
//! streams.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use serde_json::Value;

use crate::core::json_repair::{parse_lenient, LenientJson};

/// Accumulation ceiling before the buffer warning fires.
///
/// Exceeding it warns once per stream; content is never truncated.
pub const MAX_STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// A tool call still being assembled from stream fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialToolCall {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl PartialToolCall {
    /// A tool call is complete once id, name, and strictly-parsable
    /// non-empty arguments are all present.
    pub fn is_complete(&self) -> bool {
        self.id.is_some()
            && self.name.is_some()
            && !self.arguments.trim().is_empty()
            && serde_json::from_str::<Value>(&self.arguments).is_ok()
    }
}

/// A fully assembled tool call ready to surface as a content block.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Aggregate metrics for one stream, attached to the terminal chunk's
/// parent response metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingMetrics {
    pub chunks_processed: u64,
    pub average_chunk_size: u64,
    pub duration_ms: u64,
}

impl StreamingMetrics {
    pub fn to_value(self) -> Value {
        serde_json::json!({
            "chunks_processed": self.chunks_processed,
            "average_chunk_size": self.average_chunk_size,
            "duration_ms": self.duration_ms,
        })
    }
}

/// Mutable state for one logical stream.
#[derive(Debug, Default)]
pub struct StreamState {
    partial_content: BTreeMap<usize, String>,
    partial_tool_calls: BTreeMap<usize, PartialToolCall>,
    completed_tool_calls: Vec<CompletedToolCall>,
    emitted_tool_calls: HashSet<usize>,
    buffer_size: usize,
    buffer_limit: usize,
    buffer_warned: bool,
    chunks_processed: u64,
    started_at: Option<Instant>,

    /// Whether a message-start event has been observed or synthesized.
    pub message_started: bool,
    /// Content-block indices currently open.
    pub open_blocks: HashSet<usize>,
    /// Content-block indices already closed. A block closes at most once.
    pub closed_blocks: HashSet<usize>,
    /// Message id captured from the stream, if the provider sent one.
    pub message_id: Option<String>,
    /// Model id captured from the stream, if the provider sent one.
    pub model: Option<String>,
    /// Stop reason captured from a terminal event, as the raw provider
    /// string (mapping happens at emission time, per provider).
    pub stop_reason_raw: Option<String>,
    /// Last known token counts reported by the provider: (input, output).
    pub usage: Option<(u64, u64)>,
}

impl StreamState {
    pub fn new() -> Self {
        StreamState {
            buffer_limit: MAX_STREAM_BUFFER_SIZE,
            ..Default::default()
        }
    }

    /// Create a state with a non-default buffer warning threshold.
    pub fn with_buffer_limit(limit: usize) -> Self {
        StreamState {
            buffer_limit: limit.max(1),
            ..Default::default()
        }
    }

    /// Start the stream clock. Idempotent; called on every chunk.
    pub fn init_metrics(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Record one processed chunk.
    pub fn note_chunk(&mut self) {
        self.init_metrics();
        self.chunks_processed += 1;
    }

    /// Append a text fragment for a content-block index.
    ///
    /// Returns the buffer warning the first time the accumulation ceiling
    /// is crossed.
    pub fn accumulate_content(&mut self, index: usize, fragment: &str) -> Option<String> {
        self.partial_content
            .entry(index)
            .or_default()
            .push_str(fragment);
        self.grow_buffer(fragment.len())
    }

    /// Fold a tool-call fragment into the partial entry for `index`.
    ///
    /// When the entry becomes complete for the first time, the structured
    /// call is returned so the parser can emit its content block. The
    /// second element carries a buffer warning when the ceiling is crossed.
    pub fn accumulate_tool_call(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        args_fragment: Option<&str>,
    ) -> (Option<CompletedToolCall>, Option<String>) {
        let entry = self.partial_tool_calls.entry(index).or_default();
        if let Some(id) = id {
            entry.id.get_or_insert_with(|| id.to_string());
        }
        if let Some(name) = name {
            entry.name.get_or_insert_with(|| name.to_string());
        }
        let mut grew = 0;
        if let Some(fragment) = args_fragment {
            entry.arguments.push_str(fragment);
            grew = fragment.len();
        }

        let completed = if entry.is_complete() && !self.emitted_tool_calls.contains(&index) {
            let entry = &self.partial_tool_calls[&index];
            match parse_lenient(&entry.arguments) {
                LenientJson::Parsed(input) => {
                    self.emitted_tool_calls.insert(index);
                    let call = CompletedToolCall {
                        index,
                        id: entry.id.clone().unwrap_or_default(),
                        name: entry.name.clone().unwrap_or_default(),
                        input,
                    };
                    self.completed_tool_calls.push(call.clone());
                    Some(call)
                }
                _ => None,
            }
        } else {
            None
        };

        (completed, self.grow_buffer(grew))
    }

    /// Accumulated text for a content-block index, if any.
    pub fn content(&self, index: usize) -> Option<&str> {
        self.partial_content.get(&index).map(|s| s.as_str())
    }

    /// All accumulated text blocks, in index order.
    pub fn contents(&self) -> impl Iterator<Item = (usize, &str)> {
        self.partial_content.iter().map(|(i, s)| (*i, s.as_str()))
    }

    /// Tool calls fully assembled during this stream, in completion order.
    pub fn completed_tool_calls(&self) -> &[CompletedToolCall] {
        &self.completed_tool_calls
    }

    /// Tool-call indices that never completed. Used at stream end to warn
    /// about dropped fragments.
    pub fn incomplete_tool_calls(&self) -> Vec<usize> {
        self.partial_tool_calls
            .iter()
            .filter(|(index, _)| !self.emitted_tool_calls.contains(index))
            .map(|(index, _)| *index)
            .collect()
    }

    /// Total accumulated bytes (text plus tool-call argument strings).
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffer occupancy relative to the warning threshold.
    pub fn buffer_usage_percent(&self) -> f64 {
        100.0 * self.buffer_size as f64 / self.buffer_limit as f64
    }

    pub fn chunks_processed(&self) -> u64 {
        self.chunks_processed
    }

    /// Clear all accumulated state. Idempotent.
    pub fn reset_stream_state(&mut self) {
        let limit = self.buffer_limit;
        *self = StreamState {
            buffer_limit: limit,
            ..Default::default()
        };
    }

    /// Aggregate metrics over the chunks seen so far.
    pub fn metrics(&self) -> StreamingMetrics {
        let average = if self.chunks_processed > 0 {
            self.buffer_size as u64 / self.chunks_processed
        } else {
            0
        };
        StreamingMetrics {
            chunks_processed: self.chunks_processed,
            average_chunk_size: average,
            duration_ms: self
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
        }
    }

    fn grow_buffer(&mut self, by: usize) -> Option<String> {
        self.buffer_size += by;
        if self.buffer_size > self.buffer_limit && !self.buffer_warned {
            self.buffer_warned = true;
            return Some(format!(
                "stream buffer exceeded {} bytes",
                self.buffer_limit
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_accumulate_content_grows_monotonically() {
        let mut state = StreamState::new();
        state.accumulate_content(0, "Hel");
        state.accumulate_content(0, "lo");
        state.accumulate_content(1, "world");

        assert_eq!(state.content(0), Some("Hello"));
        assert_eq!(state.content(1), Some("world"));
        assert_eq!(state.buffer_size(), 10);
    }

    #[test]
    fn test_tool_call_assembles_across_fragments() {
        let mut state = StreamState::new();
        let (done, _) =
            state.accumulate_tool_call(0, Some("call_1"), Some("get_weather"), Some("{\"location\":"));
        assert!(done.is_none());

        let (done, _) = state.accumulate_tool_call(0, None, None, Some("\"New York\""));
        assert!(done.is_none());

        let (done, _) = state.accumulate_tool_call(0, None, None, Some("}"));
        let call = done.expect("tool call should complete");
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.input, json!({"location": "New York"}));
    }

    #[test]
    fn test_tool_call_completes_only_once() {
        let mut state = StreamState::new();
        let (done, _) =
            state.accumulate_tool_call(0, Some("call_1"), Some("f"), Some("{}"));
        // Empty-object arguments are not "non-empty text that parses":
        // "{}" is non-empty and parses, so this completes.
        assert!(done.is_some());

        let (done, _) = state.accumulate_tool_call(0, None, None, None);
        assert!(done.is_none());
        assert_eq!(state.completed_tool_calls().len(), 1);
    }

    #[test]
    fn test_incomplete_tool_calls_reported() {
        let mut state = StreamState::new();
        state.accumulate_tool_call(0, Some("call_1"), Some("f"), Some("{\"a\":"));
        state.accumulate_tool_call(2, Some("call_2"), Some("g"), Some("{}"));

        assert_eq!(state.incomplete_tool_calls(), vec![0]);
    }

    #[test]
    fn test_buffer_warning_fires_once() {
        let mut state = StreamState::with_buffer_limit(8);
        assert!(state.accumulate_content(0, "1234").is_none());
        let warning = state.accumulate_content(0, "567890");
        assert_eq!(warning, Some("stream buffer exceeded 8 bytes".to_string()));
        // Second crossing stays silent.
        assert!(state.accumulate_content(0, "more").is_none());
        // Content was never truncated.
        assert_eq!(state.content(0), Some("1234567890more"));
    }

    #[test]
    fn test_buffer_usage_percent() {
        let mut state = StreamState::with_buffer_limit(100);
        state.accumulate_content(0, &"x".repeat(25));
        assert_eq!(state.buffer_usage_percent(), 25.0);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut state = StreamState::new();
        state.note_chunk();
        state.accumulate_content(0, "hello");
        state.message_started = true;
        state.open_blocks.insert(0);

        state.reset_stream_state();
        let after_once = format!("{:?}", state);
        state.reset_stream_state();
        let after_twice = format!("{:?}", state);

        assert_eq!(after_once, after_twice);
        assert_eq!(state.content(0), None);
        assert_eq!(state.chunks_processed(), 0);
        assert!(!state.message_started);
    }

    #[test]
    fn test_metrics_aggregation() {
        let mut state = StreamState::new();
        state.note_chunk();
        state.note_chunk();
        state.accumulate_content(0, "12345678");

        let metrics = state.metrics();
        assert_eq!(metrics.chunks_processed, 2);
        assert_eq!(metrics.average_chunk_size, 4);
    }

    #[test]
    fn test_metrics_without_chunks() {
        let state = StreamState::new();
        let metrics = state.metrics();
        assert_eq!(metrics.chunks_processed, 0);
        assert_eq!(metrics.average_chunk_size, 0);
        assert_eq!(metrics.duration_ms, 0);
    }
}
