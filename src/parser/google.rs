//! Google Gemini generateContent parsing.
//!
//! Bodies carry a `candidates` array whose entries hold `content.parts`.
//! The `"model"` role maps to `Assistant`; function-call parts arrive with
//! structured `args` so no argument repair is needed. Stream chunks are
//! response fragments of the same shape.

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

pub struct GoogleParser;

impl GoogleParser {
    pub fn new() -> Self {
        GoogleParser
    }

    fn parts_to_blocks(
        parts: &[Value],
        call_counter: &mut usize,
        warnings: &mut Vec<String>,
    ) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                blocks.push(ContentBlock::text(text));
            } else if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = call
                    .get("args")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                *call_counter += 1;
                blocks.push(ContentBlock::tool_use(
                    format!("fc_{}", call_counter),
                    name,
                    args,
                ));
            } else if let Some(inline) = part.get("inlineData") {
                let mime = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                blocks.push(ContentBlock::image(data, mime));
            } else if let Some(file) = part.get("fileData") {
                let mime = file
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let uri = file
                    .get("fileUri")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                blocks.push(ContentBlock::image(uri, mime));
            } else {
                warnings.push("ignoring unrecognized candidate part".to_string());
            }
        }
        blocks
    }

    fn parse_inner(&self, body: &Value, warnings: &mut Vec<String>) -> Result<UnifiedResponse> {
        if let Some(error) = generic_error_envelope(body) {
            let id = synthesize_id(ProviderId::Google, body);
            return Ok(UnifiedResponse::error_document(
                id,
                ProviderId::Google,
                ModelInfo::default(),
                error,
            ));
        }

        let candidates = body
            .get("candidates")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ParseError::ShapeMismatch("missing or non-array `candidates`".to_string())
            })?;

        let mut call_counter = 0usize;
        let mut messages = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let (role, role_warning) = Role::normalize(
                candidate
                    .pointer("/content/role")
                    .and_then(Value::as_str)
                    .unwrap_or("model"),
            );
            if let Some(warning) = role_warning {
                warnings.push(warning);
            }
            let parts = candidate
                .pointer("/content/parts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            messages.push(Message::new(
                role,
                Self::parts_to_blocks(&parts, &mut call_counter, warnings),
            ));
        }

        let finish = candidates
            .first()
            .and_then(|c| c.get("finishReason"))
            .and_then(Value::as_str);
        let mapped = map_stop_reason(ProviderId::Google, finish);
        if let Some(warning) = &mapped.warning {
            warnings.push(warning.clone());
        }

        let (usage, usage_warning) = TokenUsage::with_wire_total(
            body.pointer("/usageMetadata/promptTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            body.pointer("/usageMetadata/candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            body.pointer("/usageMetadata/totalTokenCount")
                .and_then(Value::as_u64),
        );
        if let Some(warning) = usage_warning {
            warnings.push(warning);
        }

        let mut metadata = HashMap::new();
        note_original_stop(&mut metadata, &mapped);
        if let Some(ratings) = candidates
            .first()
            .and_then(|c| c.get("safetyRatings"))
            .filter(|v| !v.is_null())
        {
            metadata.insert("safety_ratings".to_string(), ratings.clone());
        }
        if let Some(feedback) = body.get("promptFeedback").filter(|v| !v.is_null()) {
            metadata.insert("prompt_feedback".to_string(), feedback.clone());
        }

        let model = body
            .get("modelVersion")
            .or_else(|| body.get("model"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(UnifiedResponse {
            id: body
                .get("responseId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| synthesize_id(ProviderId::Google, body)),
            provider: ProviderId::Google,
            model: ModelInfo::parse(model),
            messages,
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

        if let Some(error) = generic_error_envelope(chunk) {
            let mut response = UnifiedStreamResponse::new(
                ProviderId::Google,
                ModelInfo::parse(state.model.clone().unwrap_or_default()),
            );
            response.error = Some(error);
            return Ok(response);
        }

        let candidates = chunk
            .get("candidates")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ParseError::StreamProtocolViolation(
                    "chunk without `candidates`".to_string(),
                )
            })?;

        if state.model.is_none() {
            state.model = chunk
                .get("modelVersion")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        let mut response = UnifiedStreamResponse::new(
            ProviderId::Google,
            ModelInfo::parse(state.model.clone().unwrap_or_default()),
        );

        if !state.message_started {
            state.message_started = true;
            response.chunks.push(UnifiedStreamChunk::MessageStart {
                raw: Some(chunk.clone()),
            });
        }

        let mut terminal = false;
        for candidate in candidates {
            let index = candidate
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;

            if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            if let Some(warning) = state.accumulate_content(index, text) {
                                warnings.push(warning);
                            }
                            state.open_blocks.insert(index);
                            response.chunks.push(UnifiedStreamChunk::ContentBlockDelta {
                                index,
                                delta: Delta::Text {
                                    text: text.to_string(),
                                },
                                raw: Some(chunk.clone()),
                            });
                        }
                    }
                }
            }

            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                terminal = true;
                state.stop_reason_raw = Some(reason.to_string());
                let mapped = map_stop_reason(ProviderId::Google, Some(reason));
                if let Some(warning) = &mapped.warning {
                    warnings.push(warning.clone());
                }
                note_original_stop(&mut response.metadata, &mapped);
                response.stop_reason = Some(mapped.reason);
                response.chunks.push(UnifiedStreamChunk::MessageDelta {
                    stop_reason: Some(mapped.reason),
                    raw: Some(chunk.clone()),
                });
            }
        }

        if let Some(usage) = chunk.get("usageMetadata") {
            let input = usage
                .get("promptTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let output = usage
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            state.usage = Some((input, output));
        }

        if terminal {
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

impl Default for GoogleParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderParser for GoogleParser {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: ProviderId::Google,
            name: "Google Gemini".to_string(),
            api_version: "v1beta".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            authentication_type: "api-key".to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: true,
                vision: true,
                json_mode: true,
                modalities: vec![
                    "text".to_string(),
                    "image".to_string(),
                    "audio".to_string(),
                    "video".to_string(),
                ],
            },
            models: vec![
                "gemini-1.5-pro".to_string(),
                "gemini-1.5-flash".to_string(),
                "gemini-2.0-flash".to_string(),
            ],
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        body.get("candidates")
            .and_then(Value::as_array)
            .map(|candidates| {
                candidates
                    .iter()
                    .any(|c| c.pointer("/content/parts").is_some())
            })
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

    fn gemini_body() -> Value {
        json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": "The capital of France is Paris."}],
                    "role": "model"
                },
                "finishReason": "STOP",
                "index": 0,
                "safetyRatings": [
                    {"category": "HARM_CATEGORY_HARASSMENT", "probability": "NEGLIGIBLE"}
                ]
            }],
            "usageMetadata": {
                "promptTokenCount": 8,
                "candidatesTokenCount": 9,
                "totalTokenCount": 17
            },
            "modelVersion": "gemini-1.5-pro"
        })
    }

    #[test]
    fn test_parse_basic_candidate() {
        let outcome = GoogleParser::new().parse(&gemini_body());
        assert!(outcome.success);
        let response = outcome.value.unwrap();

        assert_eq!(response.provider, ProviderId::Google);
        // "model" role normalizes to assistant.
        assert_eq!(response.messages[0].role, Role::Assistant);
        assert_eq!(
            response.messages[0].text_content(),
            "The capital of France is Paris."
        );
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.total_tokens, 17);
        assert!(response.metadata.contains_key("safety_ratings"));
    }

    #[test]
    fn test_recitation_maps_high_confidence() {
        let mut body = gemini_body();
        body["candidates"][0]["finishReason"] = json!("RECITATION");

        let outcome = GoogleParser::new().parse(&body);
        assert!(outcome.success);
        let response = outcome.value.unwrap();
        assert_eq!(response.stop_reason, StopReason::Recitation);
        // Exact table match: no fuzzy warning, no original preserved.
        assert!(outcome.warnings.is_empty());
        assert!(!response.metadata.contains_key("original_stop_reason"));
    }

    #[test]
    fn test_function_call_part() {
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}],
                    "role": "model"
                },
                "finishReason": "STOP"
            }]
        });

        let response = GoogleParser::new().parse(&body).value.unwrap();
        assert_eq!(
            response.messages[0].content[0],
            ContentBlock::tool_use("fc_1", "get_weather", json!({"city": "Paris"}))
        );
    }

    #[test]
    fn test_safety_block() {
        let mut body = gemini_body();
        body["candidates"][0]["finishReason"] = json!("SAFETY");
        let response = GoogleParser::new().parse(&body).value.unwrap();
        assert_eq!(response.stop_reason, StopReason::ContentFilter);
    }

    #[test]
    fn test_error_body_parses() {
        let body = json!({
            "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
        });
        let outcome = GoogleParser::new().parse(&body);
        assert!(outcome.success);
        let error = outcome.value.unwrap().error.unwrap();
        assert_eq!(error.status_code, Some(429));
    }

    #[test]
    fn test_missing_candidates_is_shape_mismatch() {
        let outcome = GoogleParser::new().parse(&json!({"usageMetadata": {}}));
        assert!(!outcome.success);
    }

    #[test]
    fn test_stream_accumulates_by_candidate_index() {
        let parser = GoogleParser::new();
        let mut state = StreamState::new();

        parser.parse_stream(
            &json!({"candidates": [{"content": {"parts": [{"text": "Once "}], "role": "model"}, "index": 0}]}),
            &mut state,
        );
        let outcome = parser.parse_stream(
            &json!({"candidates": [{"content": {"parts": [{"text": "upon"}], "role": "model"},
                                      "index": 0, "finishReason": "STOP"}],
                     "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2}}),
            &mut state,
        );

        assert_eq!(state.content(0), Some("Once upon"));
        let response = outcome.value.unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.chunks.last().unwrap().kind(), "message_stop");
        assert_eq!(state.usage, Some((3, 2)));
    }

    #[test]
    fn test_stream_chunk_without_candidates_is_fatal() {
        let parser = GoogleParser::new();
        let mut state = StreamState::new();
        let outcome = parser.parse_stream(&json!({"foo": 1}), &mut state);
        assert!(!outcome.success);
    }
}
