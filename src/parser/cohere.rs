//! Cohere chat and generate parsing.
//!
//! The chat shape carries top-level `text` plus a `generation_id`; the
//! legacy generate shape nests text under `generations[0]`. Streams mix
//! `event_type`-tagged events (`stream-start`, `text-generation`,
//! `stream-end`).

use std::collections::HashMap;

use serde_json::Value;

use crate::core::error::{ParseError, Result};
use crate::core::stream_state::StreamState;
use crate::parser::stop_reason::map_stop_reason;
use crate::parser::unified::{
    Capabilities, ContentBlock, Delta, Message, ModelInfo, ProviderId, ProviderMetadata, Role,
    TokenUsage, UnifiedResponse, UnifiedStreamChunk, UnifiedStreamResponse,
};
use crate::parser::{
    generic_error_envelope, note_original_stop, synthesize_id, Outcome, ProviderParser,
};

const DEFAULT_MODEL: &str = "command-r-plus";

pub struct CohereParser;

impl CohereParser {
    pub fn new() -> Self {
        CohereParser
    }

    fn parse_inner(&self, body: &Value, warnings: &mut Vec<String>) -> Result<UnifiedResponse> {
        if let Some(error) = generic_error_envelope(body) {
            let id = synthesize_id(ProviderId::Cohere, body);
            return Ok(UnifiedResponse::error_document(
                id,
                ProviderId::Cohere,
                ModelInfo::parse(DEFAULT_MODEL),
                error,
            ));
        }
        // Cohere also reports errors as a bare message string.
        if let Some(message) = body.get("message").and_then(Value::as_str) {
            if body.get("text").is_none() && body.get("generations").is_none() {
                let mut info = crate::parser::unified::ErrorInfo::new(
                    "error",
                    crate::parser::unified::ErrorType::Unknown,
                    message,
                );
                info.status_code = body
                    .get("status_code")
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok());
                let id = synthesize_id(ProviderId::Cohere, body);
                return Ok(UnifiedResponse::error_document(
                    id,
                    ProviderId::Cohere,
                    ModelInfo::parse(DEFAULT_MODEL),
                    info,
                ));
            }
        }

        let text = body
            .get("text")
            .and_then(Value::as_str)
            .or_else(|| body.pointer("/generations/0/text").and_then(Value::as_str));

        let text = match text {
            Some(t) => t,
            None => {
                return Err(ParseError::ShapeMismatch(
                    "missing `text` and `generations[0].text`".to_string(),
                ))
            }
        };

        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }

        if let Some(calls) = body.get("tool_calls").and_then(Value::as_array) {
            for (i, call) in calls.iter().enumerate() {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let parameters = call
                    .get("parameters")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                // Cohere tool calls carry no id; synthesize a positional one.
                content.push(ContentBlock::tool_use(
                    format!("cohere_tool_{}", i),
                    name,
                    parameters,
                ));
            }
        }

        let finish = body
            .get("finish_reason")
            .and_then(Value::as_str)
            .or_else(|| {
                body.pointer("/generations/0/finish_reason")
                    .and_then(Value::as_str)
            });
        let mapped = map_stop_reason(ProviderId::Cohere, finish);
        if let Some(warning) = &mapped.warning {
            warnings.push(warning.clone());
        }

        let usage = TokenUsage::new(
            body.pointer("/meta/tokens/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            body.pointer("/meta/tokens/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        );

        let mut metadata = HashMap::new();
        note_original_stop(&mut metadata, &mapped);
        if let Some(billed) = body.pointer("/meta/billed_units").filter(|v| !v.is_null()) {
            metadata.insert("billed_units".to_string(), billed.clone());
        }

        let id = body
            .get("generation_id")
            .or_else(|| body.get("response_id"))
            .or_else(|| body.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_id(ProviderId::Cohere, body));

        Ok(UnifiedResponse {
            id,
            provider: ProviderId::Cohere,
            model: ModelInfo::parse(
                body.get("model").and_then(Value::as_str).unwrap_or(DEFAULT_MODEL),
            ),
            messages: vec![Message::new(Role::Assistant, content)],
            stop_reason: mapped.reason,
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

        let mut response = UnifiedStreamResponse::new(
            ProviderId::Cohere,
            ModelInfo::parse(state.model.clone().unwrap_or(DEFAULT_MODEL.to_string())),
        );

        let event_type = chunk
            .get("event_type")
            .and_then(Value::as_str)
            // Token-only events omit event_type but carry text.
            .or_else(|| chunk.get("text").map(|_| "text-generation"))
            .ok_or_else(|| {
                ParseError::StreamProtocolViolation("chunk without event_type".to_string())
            })?;

        match event_type {
            "stream-start" => {
                state.message_started = true;
                state.message_id = chunk
                    .get("generation_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                response.chunks.push(UnifiedStreamChunk::MessageStart {
                    raw: Some(chunk.clone()),
                });
            }
            "text-generation" => {
                if !state.message_started {
                    state.message_started = true;
                    response.chunks.push(UnifiedStreamChunk::MessageStart {
                        raw: Some(chunk.clone()),
                    });
                }
                if let Some(text) = chunk.get("text").and_then(Value::as_str) {
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
            "stream-end" => {
                let finish = chunk.get("finish_reason").and_then(Value::as_str);
                if let Some(reason) = finish {
                    state.stop_reason_raw = Some(reason.to_string());
                }
                let mapped = map_stop_reason(ProviderId::Cohere, finish);
                if let Some(warning) = &mapped.warning {
                    warnings.push(warning.clone());
                }
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

impl Default for CohereParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderParser for CohereParser {
    fn id(&self) -> ProviderId {
        ProviderId::Cohere
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: ProviderId::Cohere,
            name: "Cohere".to_string(),
            api_version: "v1".to_string(),
            base_url: "https://api.cohere.ai/v1".to_string(),
            authentication_type: "bearer".to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: true,
                vision: false,
                json_mode: true,
                modalities: vec!["text".to_string()],
            },
            models: vec![
                "command-r-plus".to_string(),
                "command-r".to_string(),
                "command-light".to_string(),
            ],
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        let has_generation_id = body.get("generation_id").is_some();
        let has_payload = body.get("text").is_some() || body.get("chat_history").is_some();
        if has_generation_id && has_payload {
            return true;
        }
        // Legacy generate shape.
        body.get("generations")
            .and_then(Value::as_array)
            .map(|gens| gens.iter().any(|g| g.get("text").is_some()))
            .unwrap_or(false)
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
    use crate::parser::unified::StopReason;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_chat_shape() {
        let body = json!({
            "text": "LLMs are large language models.",
            "generation_id": "gen_1",
            "finish_reason": "COMPLETE",
            "meta": {"tokens": {"input_tokens": 12, "output_tokens": 8}}
        });

        let outcome = CohereParser::new().parse(&body);
        assert!(outcome.success);
        let response = outcome.value.unwrap();
        assert_eq!(response.id, "gen_1");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 12);
        // Model defaults when the body omits it.
        assert_eq!(response.model.id, DEFAULT_MODEL);
    }

    #[test]
    fn test_parse_legacy_generations() {
        let body = json!({
            "id": "gen_legacy",
            "generations": [{"id": "g0", "text": "hello", "finish_reason": "COMPLETE"}]
        });

        let response = CohereParser::new().parse(&body).value.unwrap();
        assert_eq!(response.messages[0].text_content(), "hello");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn test_tool_calls_get_synthetic_ids() {
        let body = json!({
            "text": "",
            "generation_id": "gen_2",
            "finish_reason": "COMPLETE",
            "tool_calls": [{"name": "query_db", "parameters": {"sql": "select 1"}}]
        });

        let response = CohereParser::new().parse(&body).value.unwrap();
        assert_eq!(
            response.messages[0].content[0],
            ContentBlock::tool_use("cohere_tool_0", "query_db", json!({"sql": "select 1"}))
        );
    }

    #[test]
    fn test_toxic_finish_maps_to_content_filter() {
        let body = json!({
            "text": "",
            "generation_id": "gen_3",
            "finish_reason": "ERROR_TOXIC"
        });
        let response = CohereParser::new().parse(&body).value.unwrap();
        assert_eq!(response.stop_reason, StopReason::ContentFilter);
    }

    #[test]
    fn test_bare_message_error() {
        let body = json!({"message": "invalid api token"});
        let outcome = CohereParser::new().parse(&body);
        assert!(outcome.success);
        assert_eq!(outcome.value.unwrap().error.unwrap().message, "invalid api token");
    }

    #[test]
    fn test_detect_shape() {
        let parser = CohereParser::new();
        assert!(parser.detect_shape(&json!({"generation_id": "g", "text": "x"})));
        assert!(parser.detect_shape(&json!({"generations": [{"text": "x"}]})));
        assert!(!parser.detect_shape(&json!({"choices": []})));
        assert!(!parser.detect_shape(&json!({"generation_id": "g"})));
    }

    #[test]
    fn test_stream_lifecycle() {
        let parser = CohereParser::new();
        let mut state = StreamState::new();

        parser.parse_stream(
            &json!({"event_type": "stream-start", "generation_id": "gen_s"}),
            &mut state,
        );
        parser.parse_stream(
            &json!({"event_type": "text-generation", "text": "Hi"}),
            &mut state,
        );
        let outcome = parser.parse_stream(
            &json!({"event_type": "stream-end", "finish_reason": "COMPLETE"}),
            &mut state,
        );

        assert_eq!(state.content(0), Some("Hi"));
        let response = outcome.value.unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert!(response.metadata.contains_key("streamingMetrics"));
    }

    #[test]
    fn test_stream_token_only_event() {
        let parser = CohereParser::new();
        let mut state = StreamState::new();
        let outcome = parser.parse_stream(&json!({"text": "partial"}), &mut state);
        assert!(outcome.success);
        assert_eq!(state.content(0), Some("partial"));
    }

    #[test]
    fn test_stream_unknown_event_ignored_with_warning() {
        let parser = CohereParser::new();
        let mut state = StreamState::new();
        let outcome = parser.parse_stream(
            &json!({"event_type": "citation-generation", "citations": []}),
            &mut state,
        );
        assert!(outcome.success);
        assert!(outcome.warnings.iter().any(|w| w.contains("citation-generation")));
    }
}
