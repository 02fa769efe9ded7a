//! HuggingFace inference-API parsing.
//!
//! Three body shapes are accepted: bare `generated_text` (optionally an
//! array of one), the TGI shape with a `details` object, and the
//! conversational shape whose prior turns are reconstructed from
//! `conversation.past_user_inputs` / `generated_responses`. TGI can also be
//! deployed OpenAI-compatible, in which case the chat shape is delegated to
//! the shared chat parser.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::error::{ParseError, Result};
use crate::core::stream_state::StreamState;
use crate::parser::openai::{parse_chat_body, parse_chat_stream_chunk};
use crate::parser::stop_reason::map_stop_reason;
use crate::parser::unified::{
    Capabilities, ContentBlock, ErrorInfo, ErrorType, Message, ModelInfo, ProviderId,
    ProviderMetadata, Role, TokenUsage, UnifiedResponse, UnifiedStreamResponse,
};
use crate::parser::{note_original_stop, synthesize_id, Outcome, ProviderParser};

pub struct HuggingFaceParser;

impl HuggingFaceParser {
    pub fn new() -> Self {
        HuggingFaceParser
    }

    /// Unwrap the `[{...}]` array form the inference API uses.
    fn unwrap_array(body: &Value) -> &Value {
        match body.as_array() {
            Some(items) if items.len() == 1 => &items[0],
            _ => body,
        }
    }

    /// Hub-style ids are org/model. Ids scoped to a frontier-lab vendor
    /// belong to aggregators (OpenRouter), not hub endpoints.
    fn looks_like_hub_model(model: &str) -> bool {
        let lower = model.to_lowercase();
        lower.contains('/')
            && !lower.starts_with("accounts/")
            && !lower.starts_with("openai/")
            && !lower.starts_with("anthropic/")
            && !lower.starts_with("google/")
            && !lower.starts_with("x-ai/")
    }

    fn parse_inner(&self, body: &Value, warnings: &mut Vec<String>) -> Result<UnifiedResponse> {
        let body = Self::unwrap_array(body);

        // Model-loading and other API errors arrive as a bare string.
        if let Some(message) = body.get("error").and_then(Value::as_str) {
            let error_type = if message.to_lowercase().contains("loading") {
                ErrorType::Model
            } else {
                ErrorType::Unknown
            };
            let mut info = ErrorInfo::new("error", error_type, message);
            if let Some(estimated) = body.get("estimated_time") {
                info.details
                    .insert("estimated_time".to_string(), estimated.clone());
            }
            let id = synthesize_id(ProviderId::HuggingFace, body);
            return Ok(UnifiedResponse::error_document(
                id,
                ProviderId::HuggingFace,
                ModelInfo::default(),
                info,
            ));
        }
        if body.get("error").is_some() {
            if let Some(error) = crate::parser::generic_error_envelope(body) {
                let id = synthesize_id(ProviderId::HuggingFace, body);
                return Ok(UnifiedResponse::error_document(
                    id,
                    ProviderId::HuggingFace,
                    ModelInfo::default(),
                    error,
                ));
            }
        }

        // TGI behind an OpenAI-compatible route.
        if body.get("choices").is_some() {
            return parse_chat_body(ProviderId::HuggingFace, body, warnings);
        }

        let generated = body
            .get("generated_text")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ParseError::ShapeMismatch("missing `generated_text`".to_string())
            })?;

        let mut messages = Vec::new();

        // Conversational shape: replay prior turns before the new reply.
        if let Some(conversation) = body.get("conversation") {
            let past_inputs = conversation
                .get("past_user_inputs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let past_responses = conversation
                .get("generated_responses")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for (input, reply) in past_inputs.iter().zip(past_responses.iter()) {
                if let Some(text) = input.as_str() {
                    messages.push(Message::new(Role::User, vec![ContentBlock::text(text)]));
                }
                if let Some(text) = reply.as_str() {
                    messages.push(Message::new(
                        Role::Assistant,
                        vec![ContentBlock::text(text)],
                    ));
                }
            }
        }

        messages.push(Message::assistant_text(generated));

        let details = body.get("details");
        let finish = details
            .and_then(|d| d.get("finish_reason"))
            .and_then(Value::as_str);
        let mapped = map_stop_reason(ProviderId::HuggingFace, finish);
        if let Some(warning) = &mapped.warning {
            warnings.push(warning.clone());
        }

        let usage = TokenUsage::new(
            details
                .and_then(|d| d.get("prefill_length"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            details
                .and_then(|d| d.get("generated_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
        );

        let mut metadata = HashMap::new();
        note_original_stop(&mut metadata, &mapped);
        if let Some(seed) = details.and_then(|d| d.get("seed")).filter(|v| !v.is_null()) {
            metadata.insert("seed".to_string(), seed.clone());
        }

        Ok(UnifiedResponse {
            id: synthesize_id(ProviderId::HuggingFace, body),
            provider: ProviderId::HuggingFace,
            model: ModelInfo::parse(
                body.get("model").and_then(Value::as_str).unwrap_or_default(),
            ),
            messages,
            stop_reason: mapped.reason,
            usage,
            error: None,
            metadata,
        })
    }
}

impl Default for HuggingFaceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderParser for HuggingFaceParser {
    fn id(&self) -> ProviderId {
        ProviderId::HuggingFace
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: ProviderId::HuggingFace,
            name: "HuggingFace Inference".to_string(),
            api_version: "v1".to_string(),
            base_url: "https://api-inference.huggingface.co".to_string(),
            authentication_type: "bearer".to_string(),
            capabilities: Capabilities {
                streaming: true,
                function_calling: false,
                vision: false,
                json_mode: false,
                modalities: vec!["text".to_string()],
            },
            models: vec![
                "mistralai/Mistral-7B-Instruct-v0.3".to_string(),
                "meta-llama/Meta-Llama-3-8B-Instruct".to_string(),
            ],
        }
    }

    fn detect_shape(&self, body: &Value) -> bool {
        let body = Self::unwrap_array(body);
        if body.get("generated_text").is_some() {
            return true;
        }
        if body.pointer("/details/finish_reason").is_some() {
            return true;
        }
        // TGI-OpenAI shape with a hub-style model id.
        if body.get("choices").is_some() {
            return body
                .get("model")
                .and_then(Value::as_str)
                .map(Self::looks_like_hub_model)
                .unwrap_or(false);
        }
        false
    }

    fn detect_model_hint(&self, model: &str) -> bool {
        Self::looks_like_hub_model(model)
            && crate::parser::detector::provider_for_model(model) == Some(ProviderId::OpenRouter)
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
        // TGI streams token events; OpenAI-compatible deployments stream
        // chat chunks. The shared routine handles both.
        match parse_chat_stream_chunk(ProviderId::HuggingFace, chunk, state, true) {
            Ok((response, warnings)) => Outcome::ok(response).warn_all(warnings),
            Err(e) => Outcome::from_error(e),
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
    fn test_parse_bare_generated_text() {
        let body = json!([{"generated_text": "Once upon a time."}]);
        let outcome = HuggingFaceParser::new().parse(&body);
        assert!(outcome.success);
        let response = outcome.value.unwrap();
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0].text_content(), "Once upon a time.");
        assert_eq!(response.stop_reason, StopReason::Unknown);
    }

    #[test]
    fn test_parse_tgi_details() {
        let body = json!({
            "generated_text": "42",
            "details": {
                "finish_reason": "eos_token",
                "generated_tokens": 2,
                "prefill_length": 17,
                "seed": 12345
            }
        });

        let response = HuggingFaceParser::new().parse(&body).value.unwrap();
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 17);
        assert_eq!(response.usage.output_tokens, 2);
        assert_eq!(response.metadata.get("seed"), Some(&json!(12345)));
    }

    #[test]
    fn test_parse_conversational_shape() {
        let body = json!({
            "generated_text": "It rains a lot.",
            "conversation": {
                "past_user_inputs": ["What's the weather in Bergen?"],
                "generated_responses": ["Let me check."]
            }
        });

        let response = HuggingFaceParser::new().parse(&body).value.unwrap();
        assert_eq!(response.messages.len(), 3);
        assert_eq!(response.messages[0].role, Role::User);
        assert_eq!(response.messages[1].role, Role::Assistant);
        assert_eq!(response.messages[2].text_content(), "It rains a lot.");
    }

    #[test]
    fn test_model_loading_error() {
        let body = json!({"error": "Model bigscience/bloom is currently loading", "estimated_time": 60.0});
        let outcome = HuggingFaceParser::new().parse(&body);
        assert!(outcome.success);
        let error = outcome.value.unwrap().error.unwrap();
        assert_eq!(error.error_type, ErrorType::Model);
        assert!(error.details.contains_key("estimated_time"));
    }

    #[test]
    fn test_openai_shaped_body_delegates() {
        let body = json!({
            "id": "tgi-1",
            "object": "chat.completion",
            "model": "mistralai/Mistral-7B-Instruct-v0.3",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi"},
                "finish_reason": "stop"
            }]
        });

        let response = HuggingFaceParser::new().parse(&body).value.unwrap();
        assert_eq!(response.provider, ProviderId::HuggingFace);
        assert_eq!(response.messages[0].text_content(), "hi");
    }

    #[test]
    fn test_detect_shape() {
        let parser = HuggingFaceParser::new();
        assert!(parser.detect_shape(&json!([{"generated_text": "x"}])));
        assert!(parser.detect_shape(&json!({"generated_text": "x"})));
        assert!(parser.detect_shape(&json!({"details": {"finish_reason": "eos_token"}})));
        assert!(parser.detect_shape(&json!({
            "choices": [], "model": "org/model"
        })));
        assert!(!parser.detect_shape(&json!({"choices": [], "model": "gpt-4"})));
    }

    #[test]
    fn test_stream_token_events() {
        let parser = HuggingFaceParser::new();
        let mut state = StreamState::new();

        parser.parse_stream(
            &json!({"token": {"text": "Hel"}, "generated_text": null}),
            &mut state,
        );
        let outcome = parser.parse_stream(
            &json!({"token": {"text": "lo"}, "generated_text": "Hello",
                     "details": {"finish_reason": "length"}}),
            &mut state,
        );

        assert_eq!(state.content(0), Some("Hello"));
        assert_eq!(
            outcome.value.unwrap().stop_reason,
            Some(StopReason::MaxTokens)
        );
    }
}
