//! Replicate prediction parsing.
//!
//! Predictions move through `starting → processing → {succeeded | failed |
//! canceled}`; non-terminal states parse to empty messages with the status
//! preserved in metadata. Output can be a string, an array (joined with
//! `[Output N]` headers), or an object (pretty-printed with keys shown).
//! Streams are SSE envelopes with `output`, `logs`, `error`, and `done`
//! events.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::error::{ParseError, Result};
use crate::core::stream_state::StreamState;
use crate::parser::stop_reason::map_stop_reason;
use crate::parser::unified::{
    Capabilities, ContentBlock, Delta, ErrorInfo, ErrorType, Message, ModelInfo, ProviderId,
    ProviderMetadata, Role, StopReason, TokenUsage, UnifiedResponse, UnifiedStreamChunk,
    UnifiedStreamResponse,
};
use crate::parser::{note_original_stop, synthesize_id, Outcome, ProviderParser};

const TERMINAL_STATUSES: &[&str] = &["succeeded", "failed", "canceled", "aborted"];
const KNOWN_STATUSES: &[&str] = &[
    "starting",
    "processing",
    "succeeded",
    "failed",
    "canceled",
    "aborted",
];

pub struct ReplicateParser;

impl ReplicateParser {
    pub fn new() -> Self {
        ReplicateParser
    }

    /// Render prediction output as a single text block.
    fn output_text(output: &Value) -> Option<String> {
        match output {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => {
                let mut rendered = String::new();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        rendered.push('\n');
                    }
                    rendered.push_str(&format!("[Output {}]\n", i + 1));
                    match item {
                        Value::String(s) => rendered.push_str(s),
                        other => rendered.push_str(&other.to_string()),
                    }
                }
                Some(rendered)
            }
            Value::Object(_) => serde_json::to_string_pretty(output).ok(),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn parse_inner(&self, body: &Value, warnings: &mut Vec<String>) -> Result<UnifiedResponse> {
        // A `detail` with no prediction envelope is an API error document.
        if body.get("id").is_none() && body.get("status").is_none() {
            if let Some(detail) = body.get("detail").and_then(Value::as_str) {
                let mut info = ErrorInfo::new("detail", ErrorType::InvalidRequest, detail);
                info.status_code = body
                    .get("status_code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok());
                let id = synthesize_id(ProviderId::Replicate, body);
                return Ok(UnifiedResponse::error_document(
                    id,
                    ProviderId::Replicate,
                    ModelInfo::default(),
                    info,
                ));
            }
        }

        let status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::ShapeMismatch("missing `status`".to_string()))?;
        if !KNOWN_STATUSES.contains(&status) {
            warnings.push(format!("unknown prediction status: {}", status));
        }

        let mapped = map_stop_reason(ProviderId::Replicate, Some(status));
        let terminal = TERMINAL_STATUSES.contains(&status);

        let mut messages = Vec::new();
        let mut error = None;

        match status {
            "succeeded" => {
                if let Some(text) = body.get("output").and_then(Self::output_text) {
                    messages.push(Message::new(Role::Assistant, vec![ContentBlock::text(text)]));
                }
            }
            "failed" => {
                let message = body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("prediction failed");
                error = Some(ErrorInfo::new("prediction_failed", ErrorType::Server, message));
            }
            _ => {}
        }

        let mut usage = TokenUsage::default();
        if let Some(metrics) = body.get("metrics") {
            for key in ["predict_time", "total_time"] {
                if let Some(v) = metrics.get(key).filter(|v| !v.is_null()) {
                    usage.metadata.insert(key.to_string(), v.clone());
                }
            }
        }

        let mut metadata = HashMap::new();
        if !terminal {
            metadata.insert("status".to_string(), Value::String(status.to_string()));
        }
        note_original_stop(&mut metadata, &mapped);
        for key in ["created_at", "completed_at", "urls", "version"] {
            if let Some(v) = body.get(key).filter(|v| !v.is_null()) {
                metadata.insert(key.to_string(), v.clone());
            }
        }

        let stop_reason = if terminal {
            mapped.reason
        } else {
            StopReason::Unknown
        };

        Ok(UnifiedResponse {
            id: body
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| synthesize_id(ProviderId::Replicate, body)),
            provider: ProviderId::Replicate,
            model: ModelInfo::parse(
                body.get("model")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            ),
            messages,
            stop_reason,
            usage,
            error,
            metadata,
        })
    }

    fn parse_stream_inner(
        &self,
        chunk: &Value,
        state: &mut StreamState,
        warnings: &mut Vec<String>,
    ) -> Result<UnifiedStreamResponse> {
        state.note_chunk();

        let event = chunk
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ParseError::StreamProtocolViolation("SSE envelope without event".to_string())
            })?;
        let data = chunk.get("data");

        let mut response = UnifiedStreamResponse::new(
            ProviderId::Replicate,
            ModelInfo::parse(state.model.clone().unwrap_or_default()),
        );

        if !state.message_started {
            state.message_started = true;
            state.message_id = chunk
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string);
            response.chunks.push(UnifiedStreamChunk::MessageStart {
                raw: Some(chunk.clone()),
            });
        }

        match event {
            "output" => {
                if let Some(text) = data.and_then(Value::as_str) {
                    if !text.is_empty() {
                        if let Some(warning) = state.accumulate_content(0, text) {
                            warnings.push(warning);
                        }
                        state.open_blocks.insert(0);
                        response.chunks.push(UnifiedStreamChunk::ContentBlockDelta {
                            index: 0,
                            delta: Delta::Text {
                                text: text.to_string(),
                            },
                            raw: Some(chunk.clone()),
                        });
                    }
                }
            }
            "logs" => {
                if let Some(logs) = data {
                    response.metadata.insert("logs".to_string(), logs.clone());
                }
            }
            "error" => {
                let message = match data {
                    Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                        Ok(parsed) => parsed
                            .get("detail")
                            .and_then(Value::as_str)
                            .unwrap_or(s)
                            .to_string(),
                        Err(_) => {
                            warnings.push(
                                "error event data is not JSON; using raw text".to_string(),
                            );
                            s.clone()
                        }
                    },
                    Some(other) => other
                        .get("detail")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                    None => "unknown stream error".to_string(),
                };
                response.error = Some(ErrorInfo::new(
                    "prediction_error",
                    ErrorType::Server,
                    message,
                ));
            }
            "done" => {
                let reason = data
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_str::<Value>(s).ok())
                    .and_then(|v| {
                        v.get("reason")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    });
                let status = match reason.as_deref() {
                    Some("error") => "failed",
                    Some("canceled") => "canceled",
                    _ => "succeeded",
                };
                state.stop_reason_raw = Some(status.to_string());
                let mapped = map_stop_reason(ProviderId::Replicate, Some(status));
                note_original_stop(&mut response.metadata, &mapped);
                response.stop_reason = Some(mapped.reason);
                response.chunks.push(UnifiedStreamChunk::MessageDelta {
                    stop_reason: Some(mapped.reason),
                    raw: Some(chunk.clone()),
                });
                response.chunks.push(UnifiedStreamChunk::MessageStop {
                    raw: Some(chunk.clone()),
                });
                response.metadata.insert(
                    "streamingMetrics".to_string(),
                    state.metrics().to_value(),
                );
            }
            other => {
                warnings.push(format!("ignoring stream event {}", other));
            }
        }

        Ok(response)
    }
}

impl Default for ReplicateParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderParser for ReplicateParser {
    fn id(&self) -> ProviderId {
        ProviderId::Replicate
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: ProviderId::Replicate,
            name: "Replicate".to_string(),
            api_version: "v1".to_string(),
            base_url: "https://api.replicate.com/v1".to_string(),
            authentication_type: "bearer".to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: false,
                vision: true,
                json_mode: false,
                modalities: vec!["text".to_string(), "image".to_string()],
            },
            models: vec![
                "meta/llama-2-70b-chat".to_string(),
                "stability-ai/sdxl".to_string(),
            ],
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        let has_version = body.get("version").is_some();
        let known_status = body
            .get("status")
            .and_then(Value::as_str)
            .map(|s| KNOWN_STATUSES.contains(&s))
            .unwrap_or(false);
        if has_version && known_status {
            return true;
        }
        // SSE envelope form.
        body.get("event").and_then(Value::as_str).is_some() && body.get("data").is_some()
    }

    fn parse(&self, body: &Value) -> Outcome<UnifiedResponse> {
        let mut warnings = Vec::new();
        match self.parse_inner(body, &mut warnings) {
            Ok(response) => Outcome::ok(response).warn_all(warnings),
            Err(e) => Outcome::from_error(e).warn_all(warnings),
        }
    }

    fn parse_stream(
        &self,
        chunk: &Value,
        state: &mut StreamState,
    ) -> Outcome<UnifiedStreamResponse> {
        let mut warnings = Vec::new();
        match self.parse_stream_inner(chunk, state, &mut warnings) {
            Ok(response) => Outcome::ok(response).warn_all(warnings),
            Err(e) => Outcome::from_error(e).warn_all(warnings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_succeeded_array_output() {
        let body = json!({
            "id": "p1",
            "version": "v",
            "status": "succeeded",
            "output": ["url-a", "url-b"],
            "created_at": "2024-06-01T00:00:00Z",
            "metrics": {"predict_time": 2.5, "total_time": 3.1}
        });

        let outcome = ReplicateParser::new().parse(&body);
        assert!(outcome.success);
        let response = outcome.value.unwrap();
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert!(response.error.is_none());

        let text = response.messages[0].text_content();
        assert!(text.contains("[Output 1]"));
        assert!(text.contains("url-a"));
        assert!(text.contains("[Output 2]"));
        assert!(text.contains("url-b"));

        assert_eq!(response.usage.metadata.get("predict_time"), Some(&json!(2.5)));
        assert!(response.metadata.contains_key("created_at"));
    }

    #[test]
    fn test_succeeded_string_output() {
        let body = json!({"id": "p2", "version": "v", "status": "succeeded", "output": "done"});
        let response = ReplicateParser::new().parse(&body).value.unwrap();
        assert_eq!(response.messages[0].text_content(), "done");
    }

    #[test]
    fn test_succeeded_object_output() {
        let body = json!({
            "id": "p3", "version": "v", "status": "succeeded",
            "output": {"caption": "a cat", "score": 0.97}
        });
        let response = ReplicateParser::new().parse(&body).value.unwrap();
        let text = response.messages[0].text_content();
        assert!(text.contains("caption"));
        assert!(text.contains("a cat"));
    }

    #[test]
    fn test_failed_prediction() {
        let body = json!({
            "id": "p4", "version": "v", "status": "failed",
            "error": "CUDA out of memory"
        });
        let response = ReplicateParser::new().parse(&body).value.unwrap();
        assert_eq!(response.stop_reason, StopReason::Error);
        assert_eq!(response.error.unwrap().message, "CUDA out of memory");
        assert!(response.messages.is_empty());
    }

    #[test]
    fn test_canceled_prediction() {
        let body = json!({"id": "p5", "version": "v", "status": "canceled"});
        let response = ReplicateParser::new().parse(&body).value.unwrap();
        assert_eq!(response.stop_reason, StopReason::Canceled);
    }

    #[test]
    fn test_processing_keeps_status_in_metadata() {
        let body = json!({"id": "p6", "version": "v", "status": "processing"});
        let response = ReplicateParser::new().parse(&body).value.unwrap();
        assert!(response.messages.is_empty());
        assert_eq!(response.metadata.get("status"), Some(&json!("processing")));
        assert_eq!(response.stop_reason, StopReason::Unknown);
    }

    #[test]
    fn test_detail_error_document() {
        let body = json!({"detail": "Invalid token."});
        let outcome = ReplicateParser::new().parse(&body);
        assert!(outcome.success);
        assert_eq!(outcome.value.unwrap().error.unwrap().message, "Invalid token.");
    }

    #[test]
    fn test_detect_shape() {
        let parser = ReplicateParser::new();
        assert!(parser.detect_shape(&json!({"version": "v", "status": "starting"})));
        assert!(parser.detect_shape(&json!({"event": "output", "data": "x"})));
        assert!(!parser.detect_shape(&json!({"version": "v", "status": "weird"})));
        assert!(!parser.detect_shape(&json!({"choices": []})));
    }

    #[test]
    fn test_stream_output_and_done() {
        let parser = ReplicateParser::new();
        let mut state = StreamState::new();

        parser.parse_stream(
            &json!({"event": "output", "id": "p7", "data": "Hello "}),
            &mut state,
        );
        parser.parse_stream(&json!({"event": "output", "data": "world"}), &mut state);
        parser.parse_stream(&json!({"event": "logs", "data": "gpu warmup"}), &mut state);
        let outcome = parser.parse_stream(&json!({"event": "done", "data": "{}"}), &mut state);

        assert_eq!(state.content(0), Some("Hello world"));
        let response = outcome.value.unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert!(response.metadata.contains_key("streamingMetrics"));
    }

    #[test]
    fn test_stream_done_with_cancel_reason() {
        let parser = ReplicateParser::new();
        let mut state = StreamState::new();
        let outcome = parser.parse_stream(
            &json!({"event": "done", "data": "{\"reason\": \"canceled\"}"}),
            &mut state,
        );
        assert_eq!(outcome.value.unwrap().stop_reason, Some(StopReason::Canceled));
    }

    #[test]
    fn test_stream_error_event_json_detail() {
        let parser = ReplicateParser::new();
        let mut state = StreamState::new();
        let outcome = parser.parse_stream(
            &json!({"event": "error", "data": "{\"detail\": \"boom\"}"}),
            &mut state,
        );
        let response = outcome.value.unwrap();
        assert_eq!(response.error.unwrap().message, "boom");
    }

    #[test]
    fn test_stream_error_event_plain_text_warns() {
        let parser = ReplicateParser::new();
        let mut state = StreamState::new();
        let outcome = parser.parse_stream(
            &json!({"event": "error", "data": "something went wrong"}),
            &mut state,
        );
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("not JSON")));
        assert_eq!(
            outcome.value.unwrap().error.unwrap().message,
            "something went wrong"
        );
    }

    #[test]
    fn test_stream_missing_event_is_fatal() {
        let parser = ReplicateParser::new();
        let mut state = StreamState::new();
        let outcome = parser.parse_stream(&json!({"data": "x"}), &mut state);
        assert!(!outcome.success);
    }
}
