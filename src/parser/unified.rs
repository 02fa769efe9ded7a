//! Provider-agnostic response model.
//!
//! This module defines the target shape every provider parser produces:
//! [`UnifiedResponse`] for complete bodies, [`UnifiedStreamResponse`] for
//! incremental chunks, and the supporting enums. Discriminants are closed
//! Rust enums rather than strings so downstream matching is exhaustive.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Provider identity
// ============================================================================

/// Supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Mistral,
    Google,
    Cohere,
    XAi,
    Perplexity,
    Together,
    Fireworks,
    OpenRouter,
    Bedrock,
    Ollama,
    HuggingFace,
    Replicate,
}

impl ProviderId {
    /// All supported providers, in default registration order.
    pub const ALL: [ProviderId; 14] = [
        ProviderId::Anthropic,
        ProviderId::Google,
        ProviderId::Cohere,
        ProviderId::Replicate,
        ProviderId::Ollama,
        ProviderId::Bedrock,
        ProviderId::HuggingFace,
        ProviderId::Mistral,
        ProviderId::XAi,
        ProviderId::Perplexity,
        ProviderId::Together,
        ProviderId::Fireworks,
        ProviderId::OpenRouter,
        ProviderId::OpenAi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Mistral => "mistral",
            ProviderId::Google => "google",
            ProviderId::Cohere => "cohere",
            ProviderId::XAi => "xai",
            ProviderId::Perplexity => "perplexity",
            ProviderId::Together => "together",
            ProviderId::Fireworks => "fireworks",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Bedrock => "bedrock",
            ProviderId::Ollama => "ollama",
            ProviderId::HuggingFace => "huggingface",
            ProviderId::Replicate => "replicate",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" | "claude" => Ok(ProviderId::Anthropic),
            "mistral" => Ok(ProviderId::Mistral),
            "google" | "gemini" => Ok(ProviderId::Google),
            "cohere" => Ok(ProviderId::Cohere),
            "xai" | "x-ai" | "grok" => Ok(ProviderId::XAi),
            "perplexity" => Ok(ProviderId::Perplexity),
            "together" | "togetherai" => Ok(ProviderId::Together),
            "fireworks" => Ok(ProviderId::Fireworks),
            "openrouter" => Ok(ProviderId::OpenRouter),
            "bedrock" | "aws" => Ok(ProviderId::Bedrock),
            "ollama" => Ok(ProviderId::Ollama),
            "huggingface" | "hf" => Ok(ProviderId::HuggingFace),
            "replicate" => Ok(ProviderId::Replicate),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Three-level annotation distinguishing exact, fuzzy, and fallback results
/// of detection and stop-reason mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

// ============================================================================
// Roles and content
// ============================================================================

/// Unified message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Function,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl Role {
    /// Normalize a provider role string.
    ///
    /// Unknown roles coerce to `User` with a warning; this never fails.
    pub fn normalize(raw: &str) -> (Role, Option<String>) {
        match raw.trim().to_lowercase().as_str() {
            "system" => (Role::System, None),
            "user" => (Role::User, None),
            "assistant" | "model" => (Role::Assistant, None),
            "tool" => (Role::Tool, None),
            "function" => (Role::Function, None),
            _ => (Role::User, Some(format!("unknown role: {}", raw))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
            Role::Function => write!(f, "function"),
        }
    }
}

/// Unified content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text content.
    Text { text: String },

    /// Tool/function call from the assistant, with fully parsed input.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    /// Result of a tool execution.
    ToolResult { tool_use_id: String, content: Value },

    /// Image content (URL or base64 data).
    Image {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },

    /// Audio content.
    Audio {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },

    /// Video content.
    Video {
        source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: Value) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
        }
    }

    pub fn image(source: impl Into<String>, mime: Option<String>) -> Self {
        ContentBlock::Image {
            source: source.into(),
            mime,
        }
    }

    /// Extract text if this is a text content block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single response candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Message { role, content }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Concatenated text from all text content blocks.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============================================================================
// Stop reasons
// ============================================================================

/// Why the model stopped generating.
///
/// The wire strings `length` and `function_call` are accepted on input as
/// aliases of `MaxTokens` and `ToolUse`; new code never emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    #[serde(alias = "length")]
    MaxTokens,
    ContextLength,
    StopSequence,
    #[serde(alias = "function_call")]
    ToolUse,
    ContentFilter,
    Recitation,
    Error,
    Canceled,
    Unknown,
}

impl Default for StopReason {
    fn default() -> Self {
        StopReason::Unknown
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::ContextLength => "context_length",
            StopReason::StopSequence => "stop_sequence",
            StopReason::ToolUse => "tool_use",
            StopReason::ContentFilter => "content_filter",
            StopReason::Recitation => "recitation",
            StopReason::Error => "error",
            StopReason::Canceled => "canceled",
            StopReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Usage
// ============================================================================

/// Token accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Provider-specific counters (cache tokens, predict time, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl TokenUsage {
    /// Build usage with `total = input + output`.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        TokenUsage {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            metadata: HashMap::new(),
        }
    }

    /// Build usage honoring a wire-reported total.
    ///
    /// The wire total is trusted when it is at least `input + output`;
    /// a smaller value is recomputed and reported via the returned warning.
    pub fn with_wire_total(
        input_tokens: u64,
        output_tokens: u64,
        wire_total: Option<u64>,
    ) -> (Self, Option<String>) {
        let sum = input_tokens + output_tokens;
        match wire_total {
            Some(total) if total >= sum => (
                TokenUsage {
                    input_tokens,
                    output_tokens,
                    total_tokens: total,
                    metadata: HashMap::new(),
                },
                None,
            ),
            Some(total) => (
                TokenUsage::new(input_tokens, output_tokens),
                Some(format!(
                    "reported total_tokens {} is less than input + output ({}); recomputed",
                    total, sum
                )),
            ),
            None => (TokenUsage::new(input_tokens, output_tokens), None),
        }
    }
}

// ============================================================================
// Errors as data
// ============================================================================

/// Error family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Authentication,
    RateLimit,
    InvalidRequest,
    Server,
    Overloaded,
    ContentFilter,
    Model,
    Network,
    Unknown,
}

impl ErrorType {
    /// Classify a provider error-type string, falling back to the HTTP
    /// status code when the string is unknown.
    pub fn from_wire(type_str: Option<&str>, status_code: Option<u16>) -> Self {
        if let Some(raw) = type_str {
            let t = raw.to_lowercase();
            if t.contains("auth") || t.contains("permission") || t.contains("key") {
                return ErrorType::Authentication;
            }
            if t.contains("rate") || t.contains("quota") {
                return ErrorType::RateLimit;
            }
            if t.contains("overloaded") {
                return ErrorType::Overloaded;
            }
            if t.contains("content") && t.contains("filter") || t.contains("moderation") {
                return ErrorType::ContentFilter;
            }
            if t.contains("invalid") || t.contains("bad_request") || t.contains("validation") {
                return ErrorType::InvalidRequest;
            }
            if t.contains("model") || t.contains("not_found") {
                return ErrorType::Model;
            }
            if t.contains("timeout") || t.contains("connection") || t.contains("network") {
                return ErrorType::Network;
            }
            if t.contains("server") || t.contains("internal") || t.contains("api_error") {
                return ErrorType::Server;
            }
        }
        match status_code {
            Some(401) | Some(403) => ErrorType::Authentication,
            Some(429) => ErrorType::RateLimit,
            Some(404) => ErrorType::Model,
            Some(408) => ErrorType::Network,
            Some(529) => ErrorType::Overloaded,
            Some(code) if code >= 500 => ErrorType::Server,
            Some(code) if code >= 400 => ErrorType::InvalidRequest,
            _ => ErrorType::Unknown,
        }
    }
}

/// Back-off guidance derived from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
}

/// A provider error surfaced as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short machine-readable identifier.
    pub code: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

impl ErrorInfo {
    pub fn new(
        code: impl Into<String>,
        error_type: ErrorType,
        message: impl Into<String>,
    ) -> Self {
        ErrorInfo {
            code: code.into(),
            error_type,
            message: message.into(),
            status_code: None,
            details: HashMap::new(),
        }
    }

    /// Classify whether a retry is worthwhile and how long to wait.
    ///
    /// Rate limits default to 60s unless the provider suggested a delay;
    /// server-side failures default to 10s. Client errors other than
    /// 408/409/429 are terminal.
    pub fn retry_advice(&self) -> RetryAdvice {
        let suggested = self.suggested_retry_after_ms();

        match self.error_type {
            ErrorType::RateLimit => RetryAdvice {
                retryable: true,
                retry_after_ms: Some(suggested.unwrap_or(60_000)),
            },
            ErrorType::Server | ErrorType::Overloaded => RetryAdvice {
                retryable: true,
                retry_after_ms: Some(suggested.unwrap_or(10_000)),
            },
            ErrorType::Network => RetryAdvice {
                retryable: true,
                retry_after_ms: suggested,
            },
            ErrorType::Authentication | ErrorType::InvalidRequest | ErrorType::ContentFilter => {
                RetryAdvice {
                    retryable: false,
                    retry_after_ms: None,
                }
            }
            ErrorType::Model | ErrorType::Unknown => match self.status_code {
                Some(code) if code >= 500 => RetryAdvice {
                    retryable: true,
                    retry_after_ms: Some(suggested.unwrap_or(10_000)),
                },
                Some(408) | Some(409) | Some(429) => RetryAdvice {
                    retryable: true,
                    retry_after_ms: suggested,
                },
                Some(_) => RetryAdvice {
                    retryable: false,
                    retry_after_ms: None,
                },
                None => RetryAdvice {
                    retryable: self.code == "timeout",
                    retry_after_ms: None,
                },
            },
        }
    }

    fn suggested_retry_after_ms(&self) -> Option<u64> {
        if let Some(ms) = self.details.get("retry_after_ms").and_then(Value::as_u64) {
            return Some(ms);
        }
        // Plain retry_after values are seconds, per HTTP convention.
        self.details
            .get("retry_after")
            .and_then(Value::as_u64)
            .map(|secs| secs * 1000)
    }
}

// ============================================================================
// Model identity
// ============================================================================

static MODEL_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<family>.+?)[-@](?P<version>\d{8}|\d{4}-\d{2}-\d{2}|v\d+(?:[.:]\d+)*)$")
        .expect("model version regex")
});

/// Model identity with an optional family/version split.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ModelInfo {
    /// Derive family/version from the model id when the pattern is
    /// unambiguous (a trailing date or `vN` suffix); otherwise leave both
    /// unset.
    pub fn parse(id: impl Into<String>) -> Self {
        let id = id.into();
        match MODEL_VERSION_RE.captures(&id) {
            Some(caps) => {
                let family = caps.name("family").map(|m| m.as_str().to_string());
                let version = caps.name("version").map(|m| m.as_str().to_string());
                ModelInfo {
                    id,
                    family,
                    version,
                }
            }
            None => ModelInfo {
                id,
                family: None,
                version: None,
            },
        }
    }
}

// ============================================================================
// Unified response
// ============================================================================

/// The provider-agnostic response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub id: String,
    pub provider: ProviderId,
    pub model: ModelInfo,
    /// One entry per response candidate; most providers yield exactly one.
    pub messages: Vec<Message>,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Present only when the response body is an error document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl UnifiedResponse {
    /// An error-document response: no candidates, error populated.
    pub fn error_document(
        id: String,
        provider: ProviderId,
        model: ModelInfo,
        error: ErrorInfo,
    ) -> Self {
        UnifiedResponse {
            id,
            provider,
            model,
            messages: vec![],
            stop_reason: StopReason::Error,
            usage: TokenUsage::default(),
            error: Some(error),
            metadata: HashMap::new(),
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Payload of a content-block delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    Text { text: String },
    ToolArguments { partial_json: String },
}

/// One unified streaming event.
///
/// Every variant carries the originating chunk in `raw` for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnifiedStreamChunk {
    MessageStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
    ContentBlockStart {
        index: usize,
        block: ContentBlock,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
    ContentBlockStop {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
    MessageDelta {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
    MessageStop {
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<Value>,
    },
}

impl UnifiedStreamChunk {
    pub fn kind(&self) -> &'static str {
        match self {
            UnifiedStreamChunk::MessageStart { .. } => "message_start",
            UnifiedStreamChunk::ContentBlockStart { .. } => "content_block_start",
            UnifiedStreamChunk::ContentBlockDelta { .. } => "content_block_delta",
            UnifiedStreamChunk::ContentBlockStop { .. } => "content_block_stop",
            UnifiedStreamChunk::MessageDelta { .. } => "message_delta",
            UnifiedStreamChunk::MessageStop { .. } => "message_stop",
            UnifiedStreamChunk::Ping { .. } => "ping",
        }
    }
}

/// Unified view of one streaming input chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedStreamResponse {
    pub provider: ProviderId,
    pub model: ModelInfo,
    /// Events derived from the input chunk, in derivation order.
    pub chunks: Vec<UnifiedStreamChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl UnifiedStreamResponse {
    pub fn new(provider: ProviderId, model: ModelInfo) -> Self {
        UnifiedStreamResponse {
            provider,
            model,
            chunks: vec![],
            stop_reason: None,
            error: None,
            metadata: HashMap::new(),
        }
    }
}

// ============================================================================
// Provider metadata
// ============================================================================

/// Static capability description for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub function_calling: bool,
    pub vision: bool,
    pub json_mode: bool,
    pub modalities: Vec<String>,
}

/// Static description of one provider. No runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub id: ProviderId,
    pub name: String,
    pub api_version: String,
    pub base_url: String,
    pub authentication_type: String,
    pub capabilities: Capabilities,
    pub models: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_provider_display_round_trip() {
        for provider in ProviderId::ALL {
            let parsed: ProviderId = provider.to_string().parse().unwrap();
            assert_eq!(parsed, provider);
        }
    }

    #[test]
    fn test_provider_from_str_aliases() {
        assert_eq!("claude".parse::<ProviderId>().unwrap(), ProviderId::Anthropic);
        assert_eq!("gemini".parse::<ProviderId>().unwrap(), ProviderId::Google);
        assert_eq!("hf".parse::<ProviderId>().unwrap(), ProviderId::HuggingFace);
        assert!("acme".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_role_normalize() {
        assert_eq!(Role::normalize("assistant"), (Role::Assistant, None));
        assert_eq!(Role::normalize("model"), (Role::Assistant, None));
        assert_eq!(Role::normalize("SYSTEM"), (Role::System, None));
        assert_eq!(Role::normalize("function"), (Role::Function, None));

        let (role, warning) = Role::normalize("narrator");
        assert_eq!(role, Role::User);
        assert_eq!(warning, Some("unknown role: narrator".to_string()));
    }

    #[test]
    fn test_stop_reason_legacy_aliases() {
        let reason: StopReason = serde_json::from_value(json!("length")).unwrap();
        assert_eq!(reason, StopReason::MaxTokens);

        let reason: StopReason = serde_json::from_value(json!("function_call")).unwrap();
        assert_eq!(reason, StopReason::ToolUse);

        // Legacy strings are never emitted back.
        assert_eq!(
            serde_json::to_value(StopReason::MaxTokens).unwrap(),
            json!("max_tokens")
        );
        assert_eq!(
            serde_json::to_value(StopReason::ToolUse).unwrap(),
            json!("tool_use")
        );
    }

    #[test]
    fn test_usage_total_defaults_to_sum() {
        let usage = TokenUsage::new(9, 12);
        assert_eq!(usage.total_tokens, 21);
    }

    #[test]
    fn test_usage_trusts_larger_wire_total() {
        let (usage, warning) = TokenUsage::with_wire_total(9, 12, Some(25));
        assert_eq!(usage.total_tokens, 25);
        assert!(warning.is_none());
    }

    #[test]
    fn test_usage_recomputes_smaller_wire_total() {
        let (usage, warning) = TokenUsage::with_wire_total(9, 12, Some(5));
        assert_eq!(usage.total_tokens, 21);
        assert!(warning.unwrap().contains("recomputed"));
    }

    #[test]
    fn test_error_type_from_wire() {
        assert_eq!(
            ErrorType::from_wire(Some("authentication_error"), None),
            ErrorType::Authentication
        );
        assert_eq!(
            ErrorType::from_wire(Some("rate_limit_error"), None),
            ErrorType::RateLimit
        );
        assert_eq!(
            ErrorType::from_wire(Some("overloaded_error"), None),
            ErrorType::Overloaded
        );
        assert_eq!(ErrorType::from_wire(None, Some(503)), ErrorType::Server);
        assert_eq!(ErrorType::from_wire(None, Some(400)), ErrorType::InvalidRequest);
        assert_eq!(ErrorType::from_wire(None, None), ErrorType::Unknown);
    }

    #[test]
    fn test_retry_advice_rate_limit_default() {
        let err = ErrorInfo::new("rate_limited", ErrorType::RateLimit, "slow down");
        let advice = err.retry_advice();
        assert!(advice.retryable);
        assert_eq!(advice.retry_after_ms, Some(60_000));
    }

    #[test]
    fn test_retry_advice_honors_provider_hint() {
        let mut err = ErrorInfo::new("rate_limited", ErrorType::RateLimit, "slow down");
        err.details.insert("retry_after".to_string(), json!(5));
        assert_eq!(err.retry_advice().retry_after_ms, Some(5_000));
    }

    #[test]
    fn test_retry_advice_server_default() {
        let err = ErrorInfo::new("internal", ErrorType::Overloaded, "busy");
        let advice = err.retry_advice();
        assert!(advice.retryable);
        assert_eq!(advice.retry_after_ms, Some(10_000));
    }

    #[test]
    fn test_retry_advice_terminal_families() {
        for error_type in [
            ErrorType::Authentication,
            ErrorType::InvalidRequest,
            ErrorType::ContentFilter,
        ] {
            let err = ErrorInfo::new("nope", error_type, "no");
            assert!(!err.retry_advice().retryable);
        }
    }

    #[test]
    fn test_retry_advice_conflict_status() {
        let mut err = ErrorInfo::new("conflict", ErrorType::Unknown, "409");
        err.status_code = Some(409);
        assert!(err.retry_advice().retryable);

        err.status_code = Some(422);
        assert!(!err.retry_advice().retryable);
    }

    #[test]
    fn test_model_info_version_split() {
        let model = ModelInfo::parse("claude-3-5-sonnet-20241022");
        assert_eq!(model.family.as_deref(), Some("claude-3-5-sonnet"));
        assert_eq!(model.version.as_deref(), Some("20241022"));

        let model = ModelInfo::parse("gpt-4-turbo");
        assert!(model.family.is_none());
        assert!(model.version.is_none());

        let model = ModelInfo::parse("anthropic.claude-3-sonnet@v1:0");
        assert_eq!(model.version.as_deref(), Some("v1:0"));
    }

    #[test]
    fn test_content_block_serialization() {
        let block = ContentBlock::text("Hello");
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "Hello"}));

        let block = ContentBlock::tool_use("tu_1", "get_weather", json!({"city": "NY"}));
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["input"]["city"], "NY");
    }

    #[test]
    fn test_stream_chunk_kinds() {
        assert_eq!(UnifiedStreamChunk::Ping { raw: None }.kind(), "ping");
        assert_eq!(
            UnifiedStreamChunk::ContentBlockDelta {
                index: 0,
                delta: Delta::Text {
                    text: "hi".to_string()
                },
                raw: None,
            }
            .kind(),
            "content_block_delta"
        );
    }

    #[test]
    fn test_message_text_content() {
        let message = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::text("Hello, "),
                ContentBlock::tool_use("t1", "noop", json!({})),
                ContentBlock::text("world"),
            ],
        );
        assert_eq!(message.text_content(), "Hello, world");
    }
}
