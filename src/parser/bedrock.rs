//! AWS Bedrock converse-API parsing.
//!
//! Bodies nest the reply under `output.message`; token counts use the
//! camelCase `inputTokens` / `outputTokens` names. Stream events arrive as
//! single-key objects (`contentBlockDelta`, `contentBlockStop`,
//! `messageStop`, `metadata`).

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

pub struct BedrockParser;

impl BedrockParser {
    pub fn new() -> Self {
        BedrockParser
    }

    fn blocks(content: &[Value], warnings: &mut Vec<String>) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        for item in content {
            if let Some(text) = item.get("text").and_then(Value::as_str) {
                blocks.push(ContentBlock::text(text));
            } else if let Some(tool) = item.get("toolUse") {
                blocks.push(ContentBlock::tool_use(
                    tool.get("toolUseId")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    tool.get("name").and_then(Value::as_str).unwrap_or_default(),
                    tool.get("input")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                ));
            } else if let Some(result) = item.get("toolResult") {
                blocks.push(ContentBlock::tool_result(
                    result
                        .get("toolUseId")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    result.get("content").cloned().unwrap_or(Value::Null),
                ));
            } else {
                warnings.push("ignoring unrecognized converse content entry".to_string());
            }
        }
        blocks
    }

    fn parse_inner(&self, body: &Value, warnings: &mut Vec<String>) -> Result<UnifiedResponse> {
        if let Some(error) = generic_error_envelope(body) {
            let id = synthesize_id(ProviderId::Bedrock, body);
            return Ok(UnifiedResponse::error_document(
                id,
                ProviderId::Bedrock,
                ModelInfo::default(),
                error,
            ));
        }

        let message = body.pointer("/output/message").ok_or_else(|| {
            ParseError::ShapeMismatch("missing `output.message`".to_string())
        })?;

        let (role, role_warning) = Role::normalize(
            message.get("role").and_then(Value::as_str).unwrap_or("assistant"),
        );
        if let Some(warning) = role_warning {
            warnings.push(warning);
        }

        let content = message
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let stop_raw = body.get("stopReason").and_then(Value::as_str);
        let mapped = map_stop_reason(ProviderId::Bedrock, stop_raw);
        if let Some(warning) = &mapped.warning {
            warnings.push(warning.clone());
        }

        let (usage, usage_warning) = TokenUsage::with_wire_total(
            body.pointer("/usage/inputTokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            body.pointer("/usage/outputTokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            body.pointer("/usage/totalTokens").and_then(Value::as_u64),
        );
        if let Some(warning) = usage_warning {
            warnings.push(warning);
        }

        let mut metadata = HashMap::new();
        note_original_stop(&mut metadata, &mapped);
        if let Some(latency) = body.pointer("/metrics/latencyMs").filter(|v| !v.is_null()) {
            metadata.insert("latency_ms".to_string(), latency.clone());
        }

        Ok(UnifiedResponse {
            id: synthesize_id(ProviderId::Bedrock, body),
            provider: ProviderId::Bedrock,
            model: ModelInfo::parse(
                body.get("modelId").and_then(Value::as_str).unwrap_or_default(),
            ),
            messages: vec![Message::new(role, Self::blocks(&content, warnings))],
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
            ProviderId::Bedrock,
            ModelInfo::parse(state.model.clone().unwrap_or_default()),
        );

        if let Some(start) = chunk.get("messageStart") {
            state.message_started = true;
            if let Some(role) = start.get("role").and_then(Value::as_str) {
                let (_, warning) = Role::normalize(role);
                if let Some(warning) = warning {
                    warnings.push(warning);
                }
            }
            response.chunks.push(UnifiedStreamChunk::MessageStart {
                raw: Some(chunk.clone()),
            });
        } else if let Some(delta) = chunk.get("contentBlockDelta") {
            let index = delta
                .get("contentBlockIndex")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            if let Some(text) = delta.pointer("/delta/text").and_then(Value::as_str) {
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
        } else if let Some(stop) = chunk.get("contentBlockStop") {
            let index = stop
                .get("contentBlockIndex")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            if state.closed_blocks.insert(index) {
                state.open_blocks.remove(&index);
                response.chunks.push(UnifiedStreamChunk::ContentBlockStop {
                    index,
                    raw: Some(chunk.clone()),
                });
            } else {
                warnings.push(format!("content block {} stopped twice", index));
            }
        } else if let Some(stop) = chunk.get("messageStop") {
            let reason = stop.get("stopReason").and_then(Value::as_str);
            if let Some(reason) = reason {
                state.stop_reason_raw = Some(reason.to_string());
            }
            let mapped = map_stop_reason(ProviderId::Bedrock, reason);
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
        } else if let Some(metadata) = chunk.get("metadata") {
            if let Some(usage) = metadata.get("usage") {
                let input = usage.get("inputTokens").and_then(Value::as_u64).unwrap_or(0);
                let output = usage
                    .get("outputTokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                state.usage = Some((input, output));
            }
        } else {
            return Err(ParseError::StreamProtocolViolation(
                "unrecognized converse stream event".to_string(),
            ));
        }

        Ok(response)
    }
}

impl Default for BedrockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderParser for BedrockParser {
    fn id(&self) -> ProviderId {
        ProviderId::Bedrock
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: ProviderId::Bedrock,
            name: "AWS Bedrock".to_string(),
            api_version: "converse".to_string(),
            base_url: "https://bedrock-runtime.us-east-1.amazonaws.com".to_string(),
            authentication_type: "sigv4".to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: true,
                vision: true,
                json_mode: false,
                modalities: vec!["text".to_string(), "image".to_string()],
            },
            models: vec![
                "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
                "meta.llama3-70b-instruct-v1:0".to_string(),
                "amazon.titan-text-premier-v1:0".to_string(),
            ],
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        body.pointer("/output/message/content")
            .and_then(Value::as_array)
            .is_some()
            || body.get("contentBlockDelta").is_some()
            || body.get("messageStop").is_some()
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
