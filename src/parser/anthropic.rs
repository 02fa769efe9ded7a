//! Anthropic messages-API parsing.
//!
//! Non-stream bodies carry `type: "message"` with a typed content array.
//! Streams are event-driven: the `type` field selects the state-machine
//! transition, and unlike most dialects an unknown or missing event type is
//! a protocol violation rather than something to skip.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::error::{ParseError, Result};
use crate::core::stream_state::StreamState;
use crate::parser::stop_reason::map_stop_reason;
use crate::parser::unified::{
    Capabilities, ContentBlock, Delta, ErrorInfo, ErrorType, Message, ModelInfo, ProviderId,
    ProviderMetadata, Role, TokenUsage, UnifiedResponse, UnifiedStreamChunk,
    UnifiedStreamResponse,
};
use crate::parser::{note_original_stop, synthesize_id, Outcome, ProviderParser};

pub struct AnthropicParser;

impl AnthropicParser {
    pub fn new() -> Self {
        AnthropicParser
    }

    /// Error documents: `{"type": "error", "error": {"type": ..., "message": ...}}`.
    fn error_document(body: &Value) -> Option<ErrorInfo> {
        if body.get("type").and_then(Value::as_str) != Some("error") {
            return None;
        }
        let error = body.get("error")?;
        let type_str = error.get("type").and_then(Value::as_str);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let mut info = ErrorInfo::new(
            type_str.unwrap_or("error"),
            ErrorType::from_wire(type_str, None),
            message,
        );
        if let Some(retry) = error.get("retry_after") {
            info.details.insert("retry_after".to_string(), retry.clone());
        }
        Some(info)
    }

    /// Translate one typed content block, tolerating unknown types.
    fn content_block(block: &Value, warnings: &mut Vec<String>) -> Option<ContentBlock> {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => block
                .get("text")
                .and_then(Value::as_str)
                .map(ContentBlock::text),
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                let input = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                Some(ContentBlock::tool_use(id, name, input))
            }
            Some("tool_result") => {
                let id = block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let content = block.get("content").cloned().unwrap_or(Value::Null);
                Some(ContentBlock::tool_result(id, content))
            }
            Some("image") => {
                let source = block.get("source");
                let mime = source
                    .and_then(|s| s.get("media_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let data = source
                    .and_then(|s| s.get("data").or_else(|| s.get("url")))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(ContentBlock::image(data, mime))
            }
            Some(other) => {
                warnings.push(format!("ignoring content block of type {}", other));
                None
            }
            None => {
                warnings.push("ignoring content block without type".to_string());
                None
            }
        }
    }

    fn parse_inner(&self, body: &Value, warnings: &mut Vec<String>) -> Result<UnifiedResponse> {
        if let Some(error) = Self::error_document(body) {
            let id = synthesize_id(ProviderId::Anthropic, body);
            return Ok(UnifiedResponse::error_document(
                id,
                ProviderId::Anthropic,
                ModelInfo::default(),
                error,
            ));
        }

        let content = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ParseError::ShapeMismatch("missing or non-array `content`".to_string())
            })?;

        let blocks: Vec<ContentBlock> = content
            .iter()
            .filter_map(|b| Self::content_block(b, warnings))
            .collect();

        let (role, role_warning) =
            Role::normalize(body.get("role").and_then(Value::as_str).unwrap_or("assistant"));
        if let Some(warning) = role_warning {
            warnings.push(warning);
        }

        let stop_raw = body.get("stop_reason").and_then(Value::as_str);
        let mapped = map_stop_reason(ProviderId::Anthropic, stop_raw);
        if let Some(warning) = &mapped.warning {
            warnings.push(warning.clone());
        }

        let mut usage = TokenUsage::new(
            body.pointer("/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            body.pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        );
        for counter in ["cache_creation_input_tokens", "cache_read_input_tokens"] {
            if let Some(v) = body
                .pointer(&format!("/usage/{}", counter))
                .filter(|v| !v.is_null())
            {
                usage.metadata.insert(counter.to_string(), v.clone());
            }
        }

        let mut metadata = HashMap::new();
        note_original_stop(&mut metadata, &mapped);
        if let Some(sequence) = body.get("stop_sequence").filter(|v| !v.is_null()) {
            metadata.insert("stop_sequence".to_string(), sequence.clone());
        }

        Ok(UnifiedResponse {
            id: body
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| synthesize_id(ProviderId::Anthropic, body)),
            provider: ProviderId::Anthropic,
            model: ModelInfo::parse(
                body.get("model").and_then(Value::as_str).unwrap_or_default(),
            ),
            messages: vec![Message::new(role, blocks)],
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

        let event_type = chunk
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::StreamProtocolViolation("missing event type".to_string()))?;

        let mut response = UnifiedStreamResponse::new(
            ProviderId::Anthropic,
            ModelInfo::parse(state.model.clone().unwrap_or_default()),
        );

        match event_type {
            "message_start" => {
                if state.message_started {
                    warnings.push("duplicate message_start event".to_string());
                } else {
                    state.message_started = true;
                    if let Some(message) = chunk.get("message") {
                        state.message_id = message
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        state.model = message
                            .get("model")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        response.model =
                            ModelInfo::parse(state.model.clone().unwrap_or_default());
                        let input = message
                            .pointer("/usage/input_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        let output = message
                            .pointer("/usage/output_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        state.usage = Some((input, output));
                    }
                    response.chunks.push(UnifiedStreamChunk::MessageStart {
                        raw: Some(chunk.clone()),
                    });
                }
            }
            "content_block_start" => {
                let index = chunk
                    .get("index")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        ParseError::StreamProtocolViolation(
                            "content_block_start without index".to_string(),
                        )
                    })? as usize;
                if !state.open_blocks.insert(index) {
                    warnings.push(format!("content block {} started twice", index));
                }

                let block_value = chunk.get("content_block").cloned().unwrap_or(Value::Null);
                // Register tool blocks so input_json_delta fragments have an
                // id and name to attach to.
                if block_value.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let id = block_value.get("id").and_then(Value::as_str);
                    let name = block_value.get("name").and_then(Value::as_str);
                    state.accumulate_tool_call(index, id, name, None);
                }

                let block = Self::content_block(&block_value, warnings)
                    .unwrap_or_else(|| ContentBlock::text(""));
                response.chunks.push(UnifiedStreamChunk::ContentBlockStart {
                    index,
                    block,
                    raw: Some(chunk.clone()),
                });
            }
            "content_block_delta" => {
                let index = chunk
                    .get("index")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        ParseError::StreamProtocolViolation(
                            "content_block_delta without index".to_string(),
                        )
                    })? as usize;
                let delta = chunk.get("delta").ok_or_else(|| {
                    ParseError::StreamProtocolViolation(
                        "content_block_delta without delta".to_string(),
                    )
                })?;

                if !state.open_blocks.contains(&index) {
                    warnings.push(format!("delta for unopened content block {}", index));
                }

                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let text = delta.get("text").and_then(Value::as_str).unwrap_or_default();
                        if let Some(warning) = state.accumulate_content(index, text) {
                            warnings.push(warning);
                        }
                        response.chunks.push(UnifiedStreamChunk::ContentBlockDelta {
                            index,
                            delta: Delta::Text {
                                text: text.to_string(),
                            },
                            raw: Some(chunk.clone()),
                        });
                    }
                    Some("input_json_delta") => {
                        let partial = delta
                            .get("partial_json")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let (_, warning) =
                            state.accumulate_tool_call(index, None, None, Some(partial));
                        if let Some(warning) = warning {
                            warnings.push(warning);
                        }
                        response.chunks.push(UnifiedStreamChunk::ContentBlockDelta {
                            index,
                            delta: Delta::ToolArguments {
                                partial_json: partial.to_string(),
                            },
                            raw: Some(chunk.clone()),
                        });
                    }
                    Some(other) => {
                        warnings.push(format!("ignoring delta of type {}", other));
                    }
                    None => {
                        return Err(ParseError::StreamProtocolViolation(
                            "delta without type".to_string(),
                        ))
                    }
                }
            }
            "content_block_stop" => {
                let index = chunk
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                if state.closed_blocks.contains(&index) {
                    warnings.push(format!("content block {} stopped twice", index));
                } else {
                    state.closed_blocks.insert(index);
                    state.open_blocks.remove(&index);
                    response.chunks.push(UnifiedStreamChunk::ContentBlockStop {
                        index,
                        raw: Some(chunk.clone()),
                    });
                }
            }
            "message_delta" => {
                let stop_raw = chunk
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str);
                if let Some(raw) = stop_raw {
                    state.stop_reason_raw = Some(raw.to_string());
                }
                let mapped = map_stop_reason(ProviderId::Anthropic, stop_raw);
                if let Some(warning) = &mapped.warning {
                    warnings.push(warning.clone());
                }
                note_original_stop(&mut response.metadata, &mapped);
                if let Some(output) = chunk
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    let input = state.usage.map(|(i, _)| i).unwrap_or(0);
                    state.usage = Some((input, output));
                }
                response.stop_reason = stop_raw.map(|_| mapped.reason);
                response.chunks.push(UnifiedStreamChunk::MessageDelta {
                    stop_reason: stop_raw.map(|_| mapped.reason),
                    raw: Some(chunk.clone()),
                });
            }
            "message_stop" => {
                response.chunks.push(UnifiedStreamChunk::MessageStop {
                    raw: Some(chunk.clone()),
                });
                let mapped =
                    map_stop_reason(ProviderId::Anthropic, state.stop_reason_raw.as_deref());
                response.stop_reason = Some(mapped.reason);
                response.metadata.insert(
                    "streamingMetrics".to_string(),
                    state.metrics().to_value(),
                );
            }
            "ping" => {
                response.chunks.push(UnifiedStreamChunk::Ping {
                    raw: Some(chunk.clone()),
                });
            }
            "error" => {
                let error = Self::error_document(chunk).unwrap_or_else(|| {
                    ErrorInfo::new(
                        "error",
                        ErrorType::Unknown,
                        chunk
                            .pointer("/error/message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown stream error"),
                    )
                });
                response.error = Some(error);
            }
            other => {
                return Err(ParseError::StreamProtocolViolation(format!(
                    "unknown event type: {}",
                    other
                )))
            }
        }

        Ok(response)
    }
}

impl Default for AnthropicParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderParser for AnthropicParser {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: ProviderId::Anthropic,
            name: "Anthropic".to_string(),
            api_version: "2023-06-01".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            authentication_type: "x-api-key".to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: true,
                vision: true,
                json_mode: false,
                modalities: vec!["text".to_string(), "image".to_string()],
            },
            models: vec![
                "claude-3-5-sonnet-20241022".to_string(),
                "claude-3-opus-20240229".to_string(),
                "claude-3-haiku-20240307".to_string(),
            ],
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        match body.get("type").and_then(Value::as_str) {
            Some("message") => body
                .get("content")
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .all(|b| b.get("type").and_then(Value::as_str).is_some())
                })
                .unwrap_or(false),
            Some("error") => body.get("error").is_some(),
            // Stream events carry their own type vocabulary.
            Some(
                "message_start" | "content_block_start" | "content_block_delta"
                | "content_block_stop" | "message_delta" | "message_stop" | "ping",
            ) => true,
            _ => false,
        }
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
