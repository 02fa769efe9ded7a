//! Provider parsing and unification.
//!
//! This module turns heterogeneous provider response bodies into the
//! unified model. The flow:
//!
//! ```text
//! decoded JSON (+ headers, url)
//!     ↓
//! [registry: detect_provider]   ← headers → URL → shape → model hint
//!     ↓
//! [provider parser: parse]      ← wire shape → UnifiedResponse
//!     ↓
//! Outcome envelope              ← value + warnings + detection trace
//! ```
//!
//! Streaming follows the same path per chunk, with accumulation state held
//! in a [`StreamSession`] owned by the caller.

pub mod anthropic;
pub mod bedrock;
pub mod cohere;
pub mod detector;
pub mod envelope;
pub mod google;
pub mod huggingface;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod replicate;
pub mod stop_reason;
pub mod unified;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::error::{ParseError, Result};
use crate::core::stream_state::StreamState;
pub use detector::HeaderView;
pub use envelope::{Detection, DetectionMethod, DetectionResult, Outcome};
pub use registry::{
    parse_response, parse_stream, register_all_providers, register_provider, registry,
    registry_mut, reset_registry, ProviderRegistry,
};
pub use stop_reason::{map_stop_reason, MappedStopReason};
pub use unified::*;

// ============================================================================
// Parser trait
// ============================================================================

/// A parser for one provider's wire format.
///
/// Parsers are stateless; stream accumulation lives in the caller-owned
/// [`StreamState`] so one parser instance can serve many streams.
pub trait ProviderParser: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Static capability description.
    fn metadata(&self) -> ProviderMetadata;

    /// Does the body carry this provider's shape fingerprint?
    fn detect_shape(&self, body: &Value) -> bool;

    /// Do the transport headers identify this provider?
    fn detect_headers(&self, headers: &HeaderView<'_>) -> bool {
        detector::provider_for_headers(headers) == Some(self.id())
    }

    /// Does the request URL point at this provider?
    fn detect_url(&self, url: &str) -> bool {
        detector::provider_for_url(url) == Some(self.id())
    }

    /// Does the model id in the body hint at this provider?
    fn detect_model_hint(&self, model: &str) -> bool {
        detector::model_hints_at(self.id(), model)
    }

    /// Combined detection over all signals, strongest first.
    fn detect(
        &self,
        body: &Value,
        headers: Option<&HashMap<String, String>>,
        url: Option<&str>,
    ) -> bool {
        if let Some(h) = headers {
            if self.detect_headers(&HeaderView::new(h)) {
                return true;
            }
        }
        if let Some(u) = url {
            if self.detect_url(u) {
                return true;
            }
        }
        if self.detect_shape(body) {
            return true;
        }
        detector::model_from_body(body)
            .map(|m| self.detect_model_hint(m))
            .unwrap_or(false)
    }

    /// Parse a complete response body.
    fn parse(&self, body: &Value) -> Outcome<UnifiedResponse>;

    /// Parse one streaming chunk, accumulating into `state`.
    fn parse_stream(&self, chunk: &Value, state: &mut StreamState)
        -> Outcome<UnifiedStreamResponse>;
}

// ============================================================================
// Shared parse helpers
// ============================================================================

/// Reject bodies that cannot route anywhere: null, booleans, numbers, or
/// bare strings. Objects and arrays pass (some providers return arrays).
pub(crate) fn check_routable(body: &Value) -> Result<()> {
    match body {
        Value::Object(_) | Value::Array(_) => Ok(()),
        Value::Null => Err(ParseError::InvalidInput(
            "response body is null".to_string(),
        )),
        other => Err(ParseError::InvalidInput(format!(
            "response body must be a JSON object, got {}",
            json_type_name(other)
        ))),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Synthesize a stable id for bodies that ship without one.
pub(crate) fn synthesize_id(provider: ProviderId, body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        chrono::Utc::now()
            .timestamp_millis()
            .to_be_bytes(),
    );
    hasher.update(body.to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", provider, &digest[..16])
}

/// Record the raw stop value in metadata when the mapping was less than
/// fully confident.
pub(crate) fn note_original_stop(
    metadata: &mut HashMap<String, Value>,
    mapped: &MappedStopReason,
) {
    if mapped.confidence < Confidence::High {
        if let Some(original) = &mapped.original {
            metadata.insert(
                "original_stop_reason".to_string(),
                Value::String(original.clone()),
            );
        }
    }
}

/// Extract a generic top-level `error` envelope.
///
/// Covers the OpenAI-family `{"error": {...}}` object form and the bare
/// string form some providers use. Provider parsers layer their own
/// error-document shapes on top of this.
pub(crate) fn generic_error_envelope(body: &Value) -> Option<ErrorInfo> {
    let error = body.get("error")?;
    match error {
        Value::Object(obj) => {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let type_str = obj.get("type").and_then(Value::as_str);
            let status_code = obj
                .get("code")
                .and_then(Value::as_u64)
                .or_else(|| body.get("status").and_then(Value::as_u64))
                .and_then(|c| u16::try_from(c).ok())
                .filter(|c| (100..600).contains(c));
            let code = obj
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| type_str.map(str::to_string))
                .unwrap_or_else(|| "error".to_string());

            let mut info = ErrorInfo::new(
                code,
                ErrorType::from_wire(type_str, status_code),
                message,
            );
            info.status_code = status_code;
            if let Some(param) = obj.get("param").filter(|p| !p.is_null()) {
                info.details.insert("param".to_string(), param.clone());
            }
            if let Some(retry) = obj.get("retry_after") {
                info.details.insert("retry_after".to_string(), retry.clone());
            }
            Some(info)
        }
        Value::String(message) => {
            let mut info = ErrorInfo::new("error", ErrorType::Unknown, message.clone());
            if let Some(estimated) = body.get("estimated_time") {
                info.details
                    .insert("estimated_time".to_string(), estimated.clone());
            }
            Some(info)
        }
        _ => None,
    }
}

// ============================================================================
// Stream sessions
// ============================================================================

/// Owned per-stream parsing handle.
///
/// Binds one parser to one [`StreamState`] so accumulation can never cross
/// streams. Feed chunks with [`push`](StreamSession::push); call
/// [`finalize`](StreamSession::finalize) after the terminal event to get
/// the aggregated response.
pub struct StreamSession {
    parser: Arc<dyn ProviderParser>,
    state: StreamState,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("parser", &self.parser.id())
            .field("state", &self.state)
            .finish()
    }
}

impl StreamSession {
    pub(crate) fn new(parser: Arc<dyn ProviderParser>, buffer_limit: usize) -> Self {
        StreamSession {
            parser,
            state: StreamState::with_buffer_limit(buffer_limit),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.parser.id()
    }

    /// Parse the next chunk of this stream.
    pub fn push(&mut self, chunk: &Value) -> Outcome<UnifiedStreamResponse> {
        self.parser.parse_stream(chunk, &mut self.state)
    }

    /// Accumulated state, for inspection.
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Drop all accumulated state so the session can serve a new stream.
    pub fn reset(&mut self) {
        self.state.reset_stream_state();
    }

    /// Assemble the aggregated response from everything accumulated.
    pub fn finalize(self) -> UnifiedResponse {
        let provider = self.parser.id();
        let state = self.state;

        let mut content: Vec<ContentBlock> = state
            .contents()
            .filter(|(_, text)| !text.is_empty())
            .map(|(_, text)| ContentBlock::text(text))
            .collect();
        for call in state.completed_tool_calls() {
            content.push(ContentBlock::tool_use(
                call.id.clone(),
                call.name.clone(),
                call.input.clone(),
            ));
        }

        let mapped = map_stop_reason(provider, state.stop_reason_raw.as_deref());
        let mut metadata = HashMap::new();
        note_original_stop(&mut metadata, &mapped);
        metadata.insert("streamingMetrics".to_string(), state.metrics().to_value());

        let usage = state
            .usage
            .map(|(input, output)| TokenUsage::new(input, output))
            .unwrap_or_default();

        let model = ModelInfo::parse(state.model.clone().unwrap_or_default());
        let id = state.message_id.clone().unwrap_or_else(|| {
            format!("stream_{}", uuid::Uuid::new_v4().simple())
        });

        let messages = if content.is_empty() {
            vec![]
        } else {
            vec![Message::new(Role::Assistant, content)]
        };

        UnifiedResponse {
            id,
            provider,
            model,
            messages,
            stop_reason: mapped.reason,
            usage,
            error: None,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_routable() {
        assert!(check_routable(&json!({})).is_ok());
        assert!(check_routable(&json!([])).is_ok());
        assert!(check_routable(&Value::Null).is_err());
        assert!(check_routable(&json!(42)).is_err());
        assert!(check_routable(&json!("text")).is_err());
    }

    #[test]
    fn test_synthesize_id_prefix_and_uniqueness() {
        let a = synthesize_id(ProviderId::OpenAi, &json!({"a": 1}));
        let b = synthesize_id(ProviderId::OpenAi, &json!({"a": 2}));
        assert!(a.starts_with("openai_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_generic_error_envelope_object() {
        let body = json!({
            "error": {
                "message": "Incorrect API key provided",
                "type": "invalid_request_error",
                "param": null,
                "code": "invalid_api_key"
            }
        });
        let info = generic_error_envelope(&body).unwrap();
        assert_eq!(info.code, "invalid_api_key");
        assert_eq!(info.message, "Incorrect API key provided");
        assert_eq!(info.error_type, ErrorType::InvalidRequest);
    }

    #[test]
    fn test_generic_error_envelope_numeric_code() {
        let body = json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted",
                "status": "RESOURCE_EXHAUSTED"
            }
        });
        let info = generic_error_envelope(&body).unwrap();
        assert_eq!(info.status_code, Some(429));
        assert_eq!(info.error_type, ErrorType::RateLimit);
    }

    #[test]
    fn test_generic_error_envelope_string() {
        let body = json!({"error": "Model is overloaded", "estimated_time": 20.0});
        let info = generic_error_envelope(&body).unwrap();
        assert_eq!(info.message, "Model is overloaded");
        assert!(info.details.contains_key("estimated_time"));
    }

    #[test]
    fn test_generic_error_envelope_absent() {
        assert!(generic_error_envelope(&json!({"choices": []})).is_none());
    }

    #[test]
    fn test_note_original_stop_only_below_high() {
        let mut metadata = HashMap::new();
        let mapped = map_stop_reason(ProviderId::OpenAi, Some("stop"));
        note_original_stop(&mut metadata, &mapped);
        assert!(metadata.is_empty());

        let mapped = map_stop_reason(ProviderId::OpenAi, Some("custom_stop_marker"));
        note_original_stop(&mut metadata, &mapped);
        assert_eq!(
            metadata.get("original_stop_reason"),
            Some(&json!("custom_stop_marker"))
        );
    }
}
