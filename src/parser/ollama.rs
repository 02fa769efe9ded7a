//! Ollama chat/generate parsing.
//!
//! Bodies are flat: `model`, `done`, and either `message.content` (chat) or
//! `response` (generate). Token counts come from `prompt_eval_count` /
//! `eval_count`; durations are nanoseconds. Tool calls are not supported by
//! the local API, so tool-call-shaped fields only warn.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::error::{ParseError, Result};
use crate::core::stream_state::StreamState;
use crate::parser::stop_reason::map_stop_reason;
use crate::parser::unified::{
    Capabilities, ContentBlock, Delta, Message, ModelInfo, ProviderId, ProviderMetadata, Role,
    StopReason, TokenUsage, UnifiedResponse, UnifiedStreamChunk, UnifiedStreamResponse,
};
use crate::parser::{
    generic_error_envelope, note_original_stop, synthesize_id, Outcome, ProviderParser,
};

pub struct OllamaParser;

impl OllamaParser {
    pub fn new() -> Self {
        OllamaParser
    }

    fn text_of(body: &Value) -> Option<&str> {
        body.pointer("/message/content")
            .and_then(Value::as_str)
            .or_else(|| body.get("response").and_then(Value::as_str))
    }

    fn parse_inner(&self, body: &Value, warnings: &mut Vec<String>) -> Result<UnifiedResponse> {
        if let Some(error) = generic_error_envelope(body) {
            let id = synthesize_id(ProviderId::Ollama, body);
            return Ok(UnifiedResponse::error_document(
                id,
                ProviderId::Ollama,
                ModelInfo::default(),
                error,
            ));
        }

        let text = Self::text_of(body).ok_or_else(|| {
            ParseError::ShapeMismatch("missing `message.content` and `response`".to_string())
        })?;

        if body.pointer("/message/tool_calls").is_some() {
            warnings.push("tool calls are not supported by this provider; ignoring".to_string());
        }

        let (role, role_warning) = Role::normalize(
            body.pointer("/message/role")
                .and_then(Value::as_str)
                .unwrap_or("assistant"),
        );
        if let Some(warning) = role_warning {
            warnings.push(warning);
        }

        let done = body.get("done").and_then(Value::as_bool).unwrap_or(false);
        let done_reason = body.get("done_reason").and_then(Value::as_str);

        // done: true finishes the turn; an explicit done_reason refines it.
        let (stop_reason, mapped) = if let Some(reason) = done_reason {
            let mapped = map_stop_reason(ProviderId::Ollama, Some(reason));
            if let Some(warning) = &mapped.warning {
                warnings.push(warning.clone());
            }
            (mapped.reason, Some(mapped))
        } else if done {
            (StopReason::EndTurn, None)
        } else {
            (StopReason::Unknown, None)
        };

        let mut usage = TokenUsage::new(
            body.get("prompt_eval_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            body.get("eval_count").and_then(Value::as_u64).unwrap_or(0),
        );
        for counter in ["total_duration", "eval_duration", "prompt_eval_duration"] {
            if let Some(v) = body.get(counter).filter(|v| !v.is_null()) {
                usage.metadata.insert(counter.to_string(), v.clone());
            }
        }

        let mut metadata = HashMap::new();
        if let Some(mapped) = &mapped {
            note_original_stop(&mut metadata, mapped);
        }
        if let Some(created) = body.get("created_at").filter(|v| !v.is_null()) {
            metadata.insert("created_at".to_string(), created.clone());
        }

        let content = if text.is_empty() {
            vec![]
        } else {
            vec![ContentBlock::text(text)]
        };

        Ok(UnifiedResponse {
            id: synthesize_id(ProviderId::Ollama, body),
            provider: ProviderId::Ollama,
            model: ModelInfo::parse(
                body.get("model").and_then(Value::as_str).unwrap_or_default(),
            ),
            messages: vec![Message::new(role, content)],
            stop_reason,
            usage,
            error: None,
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

        if state.model.is_none() {
            state.model = chunk
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let mut response = UnifiedStreamResponse::new(
            ProviderId::Ollama,
            ModelInfo::parse(state.model.clone().unwrap_or_default()),
        );

        if !state.message_started {
            state.message_started = true;
            response.chunks.push(UnifiedStreamChunk::MessageStart {
                raw: Some(chunk.clone()),
            });
        }

        if let Some(text) = Self::text_of(chunk) {
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

        let done = chunk.get("done").and_then(Value::as_bool).unwrap_or(false);
        if done {
            let done_reason = chunk.get("done_reason").and_then(Value::as_str);
            let stop_reason = match done_reason {
                Some(reason) => {
                    state.stop_reason_raw = Some(reason.to_string());
                    let mapped = map_stop_reason(ProviderId::Ollama, Some(reason));
                    if let Some(warning) = &mapped.warning {
                        warnings.push(warning.clone());
                    }
                    note_original_stop(&mut response.metadata, &mapped);
                    mapped.reason
                }
                None => StopReason::EndTurn,
            };
            if let (Some(input), Some(output)) = (
                chunk.get("prompt_eval_count").and_then(Value::as_u64),
                chunk.get("eval_count").and_then(Value::as_u64),
            ) {
                state.usage = Some((input, output));
            }
            response.stop_reason = Some(stop_reason);
            response.chunks.push(UnifiedStreamChunk::MessageDelta {
                stop_reason: Some(stop_reason),
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

        Ok(response)
    }
}

impl Default for OllamaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderParser for OllamaParser {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: ProviderId::Ollama,
            name: "Ollama".to_string(),
            api_version: "v1".to_string(),
            base_url: "http://localhost:11434".to_string(),
            authentication_type: "none".to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: false,
                vision: true,
                json_mode: true,
                modalities: vec!["text".to_string(), "image".to_string()],
            },
            models: vec![
                "llama3:8b".to_string(),
                "mistral:7b".to_string(),
                "phi3:mini".to_string(),
            ],
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        body.get("model").and_then(Value::as_str).is_some()
            && body.get("done").and_then(Value::as_bool).is_some()
            && Self::text_of(body).is_some()
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

    fn chat_body() -> Value {
        json!({
            "model": "llama3:8b",
            "created_at": "2024-06-01T12:00:00Z",
            "message": {"role": "assistant", "content": "Hello from the llama."},
            "done": true,
            "prompt_eval_count": 11,
            "eval_count": 7,
            "total_duration": 1500000000u64,
            "eval_duration": 900000000u64
        })
    }

    #[test]
    fn test_parse_chat_body() {
        let outcome = OllamaParser::new().parse(&chat_body());
        assert!(outcome.success);
        let response = outcome.value.unwrap();
        assert_eq!(response.messages[0].text_content(), "Hello from the llama.");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 11);
        assert_eq!(response.usage.output_tokens, 7);
        assert!(response.usage.metadata.contains_key("eval_duration"));
        assert!(response.metadata.contains_key("created_at"));
    }

    #[test]
    fn test_parse_generate_body() {
        let body = json!({
            "model": "llama3:8b",
            "response": "Generated text.",
            "done": true,
            "eval_count": 3
        });
        let response = OllamaParser::new().parse(&body).value.unwrap();
        assert_eq!(response.messages[0].text_content(), "Generated text.");
    }

    #[test]
    fn test_not_done_is_unknown_stop() {
        let mut body = chat_body();
        body["done"] = json!(false);
        let response = OllamaParser::new().parse(&body).value.unwrap();
        assert_eq!(response.stop_reason, StopReason::Unknown);
    }

    #[test]
    fn test_done_reason_length() {
        let mut body = chat_body();
        body["done_reason"] = json!("length");
        let response = OllamaParser::new().parse(&body).value.unwrap();
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn test_tool_call_fields_warn() {
        let mut body = chat_body();
        body["message"]["tool_calls"] = json!([{"function": {"name": "f"}}]);
        let outcome = OllamaParser::new().parse(&body);
        assert!(outcome.success);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("tool calls are not supported")));
    }

    #[test]
    fn test_detect_shape() {
        let parser = OllamaParser::new();
        assert!(parser.detect_shape(&chat_body()));
        assert!(!parser.detect_shape(&json!({"model": "llama3:8b"})));
        assert!(!parser.detect_shape(&json!({"choices": []})));
    }

    #[test]
    fn test_stream_until_done() {
        let parser = OllamaParser::new();
        let mut state = StreamState::new();

        parser.parse_stream(
            &json!({"model": "llama3:8b", "message": {"content": "Hel"}, "done": false}),
            &mut state,
        );
        let outcome = parser.parse_stream(
            &json!({"model": "llama3:8b", "message": {"content": "lo"}, "done": true,
                     "prompt_eval_count": 4, "eval_count": 2}),
            &mut state,
        );

        assert_eq!(state.content(0), Some("Hello"));
        let response = outcome.value.unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.chunks.last().unwrap().kind(), "message_stop");
        assert_eq!(state.usage, Some((4, 2)));
    }
}
