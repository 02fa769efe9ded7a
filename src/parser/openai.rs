//! OpenAI chat-completions parsing, shared by the compatible family.
//!
//! Mistral, xAI, Perplexity, Together, Fireworks, and OpenRouter all speak
//! the OpenAI chat shape with small dialect differences (stop-reason
//! vocabulary, model-id prefixes, token-shaped streams). One parser type
//! covers the family, parameterized by a static profile; stop-reason
//! mapping stays per-provider so dialects keep their own tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{ParseError, Result};
use crate::core::json_repair::parse_lenient;
use crate::core::stream_state::StreamState;
use crate::parser::detector;
use crate::parser::stop_reason::map_stop_reason;
use crate::parser::unified::{
    Capabilities, ContentBlock, Delta, Message, ModelInfo, ProviderId, ProviderMetadata, Role,
    TokenUsage, UnifiedResponse, UnifiedStreamChunk, UnifiedStreamResponse,
};
use crate::parser::{
    generic_error_envelope, note_original_stop, synthesize_id, Outcome, ProviderParser,
};

// ============================================================================
// Wire types
// ============================================================================

/// OpenAI chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    #[serde(default)]
    pub system_fingerprint: Option<String>,
    #[serde(default)]
    pub service_tier: Option<String>,
}

/// One response candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: Option<usize>,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub call_type: Option<String>,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFunctionCall {
    pub name: String,
    /// Arguments arrive as a JSON-encoded string.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub prompt_tokens_details: Option<Value>,
    #[serde(default)]
    pub completion_tokens_details: Option<Value>,
}

/// Streaming chunk: the non-stream shape with `delta` replacing `message`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeltaToolCall {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<DeltaFunction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ============================================================================
// Family profiles
// ============================================================================

/// Static description of one member of the OpenAI-compatible family.
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub id: ProviderId,
    pub name: &'static str,
    pub api_version: &'static str,
    pub base_url: &'static str,
    pub authentication_type: &'static str,
    pub models: &'static [&'static str],
    /// Whether the provider also emits TGI-style `token` stream events.
    pub accepts_token_stream: bool,
    pub vision: bool,
    pub function_calling: bool,
}

/// Parser for any member of the OpenAI-compatible family.
pub struct OpenAiCompatParser {
    profile: Profile,
}

impl OpenAiCompatParser {
    pub fn openai() -> Self {
        OpenAiCompatParser {
            profile: Profile {
                id: ProviderId::OpenAi,
                name: "OpenAI",
                api_version: "v1",
                base_url: "https://api.openai.com/v1",
                authentication_type: "bearer",
                models: &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo", "o1-preview"],
                accepts_token_stream: false,
                vision: true,
                function_calling: true,
            },
        }
    }

    pub fn mistral() -> Self {
        OpenAiCompatParser {
            profile: Profile {
                id: ProviderId::Mistral,
                name: "Mistral AI",
                api_version: "v1",
                base_url: "https://api.mistral.ai/v1",
                authentication_type: "bearer",
                models: &["mistral-large-latest", "mistral-small-latest", "open-mixtral-8x7b", "codestral-latest"],
                accepts_token_stream: false,
                vision: false,
                function_calling: true,
            },
        }
    }

    pub fn xai() -> Self {
        OpenAiCompatParser {
            profile: Profile {
                id: ProviderId::XAi,
                name: "xAI",
                api_version: "v1",
                base_url: "https://api.x.ai/v1",
                authentication_type: "bearer",
                models: &["grok-2", "grok-2-mini", "grok-beta"],
                accepts_token_stream: false,
                vision: true,
                function_calling: true,
            },
        }
    }

    pub fn perplexity() -> Self {
        OpenAiCompatParser {
            profile: Profile {
                id: ProviderId::Perplexity,
                name: "Perplexity",
                api_version: "v1",
                base_url: "https://api.perplexity.ai",
                authentication_type: "bearer",
                models: &["sonar", "sonar-pro", "sonar-reasoning"],
                accepts_token_stream: false,
                vision: false,
                function_calling: false,
            },
        }
    }

    pub fn together() -> Self {
        OpenAiCompatParser {
            profile: Profile {
                id: ProviderId::Together,
                name: "Together AI",
                api_version: "v1",
                base_url: "https://api.together.xyz/v1",
                authentication_type: "bearer",
                models: &["meta-llama/Llama-3-70b-chat-hf", "togethercomputer/RedPajama-INCITE-7B-Chat"],
                accepts_token_stream: true,
                vision: false,
                function_calling: true,
            },
        }
    }

    pub fn fireworks() -> Self {
        OpenAiCompatParser {
            profile: Profile {
                id: ProviderId::Fireworks,
                name: "Fireworks AI",
                api_version: "v1",
                base_url: "https://api.fireworks.ai/inference/v1",
                authentication_type: "bearer",
                models: &["accounts/fireworks/models/llama-v3p1-70b-instruct"],
                accepts_token_stream: false,
                vision: false,
                function_calling: true,
            },
        }
    }

    pub fn openrouter() -> Self {
        OpenAiCompatParser {
            profile: Profile {
                id: ProviderId::OpenRouter,
                name: "OpenRouter",
                api_version: "v1",
                base_url: "https://openrouter.ai/api/v1",
                authentication_type: "bearer",
                models: &["openai/gpt-4o", "anthropic/claude-3.5-sonnet", "meta-llama/llama-3-70b-instruct"],
                accepts_token_stream: false,
                vision: true,
                function_calling: true,
            },
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }
}

/// Does this body carry the OpenAI chat-completion fingerprint?
pub(crate) fn chat_shape(body: &Value) -> bool {
    if let Some(object) = body.get("object").and_then(Value::as_str) {
        if object == "chat.completion" || object == "chat.completion.chunk" {
            return true;
        }
    }
    body.get("choices")
        .and_then(Value::as_array)
        .map(|choices| {
            choices.iter().any(|c| {
                c.pointer("/message/role").is_some() || c.get("delta").is_some()
            })
        })
        .unwrap_or(false)
}

/// OpenAI-style error document: a top-level object with message and type.
fn error_shape(body: &Value) -> bool {
    body.get("error")
        .and_then(Value::as_object)
        .map(|e| e.contains_key("message"))
        .unwrap_or(false)
}

// ============================================================================
// Shared body parsing
// ============================================================================

/// Parse a chat-completion body into the unified shape.
///
/// Also used by the HuggingFace parser for TGI's OpenAI-compatible output.
pub(crate) fn parse_chat_body(
    provider: ProviderId,
    body: &Value,
    warnings: &mut Vec<String>,
) -> Result<UnifiedResponse> {
    if let Some(error) = generic_error_envelope(body) {
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_id(provider, body));
        let model = ModelInfo::parse(
            body.get("model").and_then(Value::as_str).unwrap_or_default(),
        );
        return Ok(UnifiedResponse::error_document(id, provider, model, error));
    }

    let wire: ChatResponse = serde_json::from_value(body.clone())
        .map_err(|e| ParseError::ShapeMismatch(e.to_string()))?;

    let mut messages = Vec::with_capacity(wire.choices.len());
    let mut saw_logprobs = false;
    for choice in &wire.choices {
        saw_logprobs |= choice.logprobs.as_ref().map(|l| !l.is_null()).unwrap_or(false);
        messages.push(choice_to_message(choice, warnings));
    }

    let finish = wire.choices.first().and_then(|c| c.finish_reason.as_deref());
    let mapped = map_stop_reason(provider, finish);
    if let Some(warning) = &mapped.warning {
        warnings.push(warning.clone());
    }

    let mut usage = TokenUsage::default();
    if let Some(wire_usage) = &wire.usage {
        let (u, warning) = TokenUsage::with_wire_total(
            wire_usage.prompt_tokens.unwrap_or(0),
            wire_usage.completion_tokens.unwrap_or(0),
            wire_usage.total_tokens,
        );
        usage = u;
        if let Some(warning) = warning {
            warnings.push(warning);
        }
        if let Some(cached) = wire_usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|d| d.get("cached_tokens"))
            .filter(|v| !v.is_null())
        {
            usage
                .metadata
                .insert("cached_tokens".to_string(), cached.clone());
        }
        if let Some(reasoning) = wire_usage
            .completion_tokens_details
            .as_ref()
            .and_then(|d| d.get("reasoning_tokens"))
            .filter(|v| !v.is_null())
        {
            usage
                .metadata
                .insert("reasoning_tokens".to_string(), reasoning.clone());
        }
    }

    let mut metadata = HashMap::new();
    note_original_stop(&mut metadata, &mapped);
    if let Some(created) = wire.created {
        metadata.insert("created".to_string(), Value::from(created));
    }
    if let Some(fingerprint) = wire.system_fingerprint {
        metadata.insert("system_fingerprint".to_string(), Value::String(fingerprint));
    }
    if let Some(tier) = wire.service_tier {
        metadata.insert("service_tier".to_string(), Value::String(tier));
    }
    if saw_logprobs {
        metadata.insert("logprobs".to_string(), Value::Bool(true));
    }

    Ok(UnifiedResponse {
        id: wire.id.unwrap_or_else(|| synthesize_id(provider, body)),
        provider,
        model: ModelInfo::parse(wire.model.unwrap_or_default()),
        messages,
        stop_reason: mapped.reason,
        usage,
        error: None,
        metadata,
    })
}

fn choice_to_message(choice: &ChatChoice, warnings: &mut Vec<String>) -> Message {
    let (role, role_warning) =
        Role::normalize(choice.message.role.as_deref().unwrap_or("assistant"));
    if let Some(warning) = role_warning {
        warnings.push(warning);
    }

    let mut content = Vec::new();
    if let Some(text) = &choice.message.content {
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
    }
    if let Some(refusal) = &choice.message.refusal {
        if !refusal.is_empty() {
            warnings.push("model returned a refusal".to_string());
            content.push(ContentBlock::text(refusal));
        }
    }
    if let Some(tool_calls) = &choice.message.tool_calls {
        for call in tool_calls {
            let parsed = parse_lenient(&call.function.arguments);
            if let Some(warning) = parsed.warning(&call.function.arguments) {
                warnings.push(warning);
            }
            match parsed.into_value() {
                Some(input) => {
                    content.push(ContentBlock::tool_use(&call.id, &call.function.name, input));
                }
                None => {
                    warnings.push(format!(
                        "suppressed tool call {} with unparsable arguments",
                        call.id
                    ));
                }
            }
        }
    }

    Message::new(role, content)
}

// ============================================================================
// Shared stream parsing
// ============================================================================

/// Parse one stream chunk of the OpenAI dialect.
pub(crate) fn parse_chat_stream_chunk(
    provider: ProviderId,
    chunk: &Value,
    state: &mut StreamState,
    accepts_token_stream: bool,
) -> Result<(UnifiedStreamResponse, Vec<String>)> {
    let mut warnings = Vec::new();
    state.note_chunk();

    if let Some(error) = generic_error_envelope(chunk) {
        let mut response = UnifiedStreamResponse::new(
            provider,
            ModelInfo::parse(state.model.clone().unwrap_or_default()),
        );
        response.error = Some(error);
        return Ok((response, warnings));
    }

    // TGI-style token events for providers that mix dialects.
    if accepts_token_stream && chunk.get("token").is_some() {
        return parse_token_stream_chunk(provider, chunk, state).map(|r| (r, warnings));
    }

    let wire: StreamChunk = serde_json::from_value(chunk.clone())
        .map_err(|e| ParseError::StreamProtocolViolation(e.to_string()))?;

    let mut response = UnifiedStreamResponse::new(
        provider,
        ModelInfo::parse(
            wire.model
                .clone()
                .or_else(|| state.model.clone())
                .unwrap_or_default(),
        ),
    );

    if !state.message_started {
        state.message_started = true;
        state.message_id = wire.id.clone();
        state.model = wire.model.clone();
        response.chunks.push(UnifiedStreamChunk::MessageStart {
            raw: Some(chunk.clone()),
        });
    }

    let mut terminal = false;
    for choice in &wire.choices {
        let index = choice.index.unwrap_or(0);

        if let Some(text) = &choice.delta.content {
            if !text.is_empty() {
                if let Some(warning) = state.accumulate_content(index, text) {
                    warnings.push(warning);
                }
                state.open_blocks.insert(index);
                response.chunks.push(UnifiedStreamChunk::ContentBlockDelta {
                    index,
                    delta: Delta::Text { text: text.clone() },
                    raw: Some(chunk.clone()),
                });
            }
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for call in tool_calls {
                let function = call.function.clone().unwrap_or_default();
                let (completed, warning) = state.accumulate_tool_call(
                    call.index,
                    call.id.as_deref(),
                    function.name.as_deref(),
                    function.arguments.as_deref(),
                );
                if let Some(warning) = warning {
                    warnings.push(warning);
                }
                if let Some(done) = completed {
                    response.chunks.push(UnifiedStreamChunk::ContentBlockStart {
                        index: done.index,
                        block: ContentBlock::tool_use(done.id, done.name, done.input),
                        raw: Some(chunk.clone()),
                    });
                }
            }
        }

        if let Some(reason) = &choice.finish_reason {
            terminal = true;
            state.stop_reason_raw = Some(reason.clone());
            let mapped = map_stop_reason(provider, Some(reason));
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

    if let Some(usage) = &wire.usage {
        let input = usage.prompt_tokens.unwrap_or(0);
        let output = usage.completion_tokens.unwrap_or(0);
        state.usage = Some((input, output));
        response.metadata.insert(
            "usage".to_string(),
            serde_json::json!({"input_tokens": input, "output_tokens": output}),
        );
    }

    if terminal {
        for index in state.incomplete_tool_calls() {
            warnings.push(format!("tool call index {} incomplete at stream end", index));
        }
        response.chunks.push(UnifiedStreamChunk::MessageStop {
            raw: Some(chunk.clone()),
        });
        response.metadata.insert(
            "streamingMetrics".to_string(),
            state.metrics().to_value(),
        );
    }

    Ok((response, warnings))
}

/// TGI token events: `{"token": {"text": ...}, "generated_text": null}`
/// until the final event carries `generated_text` and `details`.
fn parse_token_stream_chunk(
    provider: ProviderId,
    chunk: &Value,
    state: &mut StreamState,
) -> Result<UnifiedStreamResponse> {
    let mut response = UnifiedStreamResponse::new(
        provider,
        ModelInfo::parse(state.model.clone().unwrap_or_default()),
    );

    if !state.message_started {
        state.message_started = true;
        response.chunks.push(UnifiedStreamChunk::MessageStart {
            raw: Some(chunk.clone()),
        });
    }

    if let Some(text) = chunk.pointer("/token/text").and_then(Value::as_str) {
        if !text.is_empty() {
            state.accumulate_content(0, text);
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

    let finished = chunk
        .get("generated_text")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    if finished {
        let reason = chunk
            .pointer("/details/finish_reason")
            .and_then(Value::as_str);
        state.stop_reason_raw = reason.map(str::to_string);
        let mapped = map_stop_reason(provider, reason);
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

    Ok(response)
}

// ============================================================================
// ProviderParser implementation
// ============================================================================

impl ProviderParser for OpenAiCompatParser {
    fn id(&self) -> ProviderId {
        self.profile.id
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: self.profile.id,
            name: self.profile.name.to_string(),
            api_version: self.profile.api_version.to_string(),
            base_url: self.profile.base_url.to_string(),
            authentication_type: self.profile.authentication_type.to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: self.profile.function_calling,
                vision: self.profile.vision,
                json_mode: true,
                modalities: if self.profile.vision {
                    vec!["text".to_string(), "image".to_string()]
                } else {
                    vec!["text".to_string()]
                },
            },
            models: self.profile.models.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        let shape = chat_shape(body) || error_shape(body);
        if !shape {
            return false;
        }
        // Family members other than OpenAI itself only claim the shared
        // shape when the model id corroborates; plain bodies route to the
        // canonical parser.
        if self.profile.id == ProviderId::OpenAi {
            return true;
        }
        detector::model_from_body(body)
            .map(|m| self.detect_model_hint(m))
            .unwrap_or(false)
    }

    fn parse(&self, body: &Value) -> Outcome<UnifiedResponse> {
        let mut warnings = Vec::new();
        match parse_chat_body(self.profile.id, body, &mut warnings) {
            Ok(response) => Outcome::ok(response).warn_all(warnings),
            Err(e) => Outcome::from_error(e).warn_all(warnings),
        }
    }

    fn parse_stream(
        &self,
        chunk: &Value,
        state: &mut StreamState,
    ) -> Outcome<UnifiedStreamResponse> {
        match parse_chat_stream_chunk(
            self.profile.id,
            chunk,
            state,
            self.profile.accepts_token_stream,
        ) {
            Ok((response, warnings)) => Outcome::ok(response).warn_all(warnings),
            Err(e) => Outcome::from_error(e),
        }
    }
}
