//! Shared detection signal tables.
//!
//! Detection runs over four signals in fixed priority: transport headers,
//! request URL, response body shape, and finally the model id carried in
//! the body. This module holds the cross-provider tables (known hosts,
//! header markers, model-id hints) and the [`HeaderView`] wrapper; the
//! shape fingerprints live with each parser.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::parser::unified::ProviderId;

// ============================================================================
// Headers
// ============================================================================

/// Case-insensitive view over already-decoded transport headers.
#[derive(Debug, Clone, Copy)]
pub struct HeaderView<'a> {
    headers: &'a HashMap<String, String>,
}

impl<'a> HeaderView<'a> {
    pub fn new(headers: &'a HashMap<String, String>) -> Self {
        HeaderView { headers }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The bearer token from the `authorization` header, if present.
    pub fn bearer_token(&self) -> Option<&'a str> {
        self.get("authorization")
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .map(str::trim)
    }
}

/// Identify a provider from headers alone.
///
/// Version headers are checked before key-prefix heuristics: an explicit
/// `anthropic-version` is a stronger statement than a token shape.
pub fn provider_for_headers(headers: &HeaderView<'_>) -> Option<ProviderId> {
    if headers.contains("anthropic-version") || headers.contains("anthropic-beta") {
        return Some(ProviderId::Anthropic);
    }
    if headers.contains("openai-version") || headers.contains("openai-organization") {
        return Some(ProviderId::OpenAi);
    }
    if headers.contains("x-goog-api-key") {
        return Some(ProviderId::Google);
    }
    if headers.contains("x-cohere-version") {
        return Some(ProviderId::Cohere);
    }

    if let Some(key) = headers.get("x-api-key") {
        if key.starts_with("sk-ant-") {
            return Some(ProviderId::Anthropic);
        }
    }
    if let Some(token) = headers.bearer_token() {
        if token.starts_with("r8_") {
            return Some(ProviderId::Replicate);
        }
        if token.starts_with("sk-ant-") {
            return Some(ProviderId::Anthropic);
        }
        if token.starts_with("sk-or-") {
            return Some(ProviderId::OpenRouter);
        }
        if token.starts_with("xai-") {
            return Some(ProviderId::XAi);
        }
        if token.starts_with("pplx-") {
            return Some(ProviderId::Perplexity);
        }
        if token.starts_with("hf_") {
            return Some(ProviderId::HuggingFace);
        }
    }

    None
}

// ============================================================================
// URLs
// ============================================================================

const HOST_RULES: &[(&str, ProviderId)] = &[
    ("api.openai.com", ProviderId::OpenAi),
    ("api.anthropic.com", ProviderId::Anthropic),
    ("api.mistral.ai", ProviderId::Mistral),
    ("generativelanguage.googleapis.com", ProviderId::Google),
    ("api.cohere.ai", ProviderId::Cohere),
    ("api.cohere.com", ProviderId::Cohere),
    ("api.x.ai", ProviderId::XAi),
    ("api.perplexity.ai", ProviderId::Perplexity),
    ("api.together.xyz", ProviderId::Together),
    ("api.fireworks.ai", ProviderId::Fireworks),
    ("openrouter.ai", ProviderId::OpenRouter),
    ("bedrock", ProviderId::Bedrock),
    ("api.replicate.com", ProviderId::Replicate),
    ("streaming.replicate.com", ProviderId::Replicate),
    ("api-inference.huggingface.co", ProviderId::HuggingFace),
    ("huggingface.cloud", ProviderId::HuggingFace),
    ("localhost:11434", ProviderId::Ollama),
    ("127.0.0.1:11434", ProviderId::Ollama),
];

/// Identify a provider from the request URL.
pub fn provider_for_url(url: &str) -> Option<ProviderId> {
    let url = url.to_lowercase();
    HOST_RULES
        .iter()
        .find(|(host, _)| url.contains(host))
        .map(|(_, provider)| *provider)
}

/// The hosts a single provider answers on, for per-parser URL checks.
pub fn hosts_for(provider: ProviderId) -> Vec<&'static str> {
    HOST_RULES
        .iter()
        .filter(|(_, p)| *p == provider)
        .map(|(host, _)| *host)
        .collect()
}

// ============================================================================
// Model hints
// ============================================================================

static BEDROCK_MODEL_RE: Lazy<Regex> = Lazy::new(|| {
    // Bedrock model ids are dot-scoped, e.g. `anthropic.claude-3-sonnet-...`
    // or region-prefixed `us.meta.llama3-...`.
    Regex::new(r"^([a-z]{2}\.)?(amazon|anthropic|meta|mistral|cohere|ai21|stability)\.")
        .expect("bedrock model regex")
});

/// Does `id` start with `prefix` at a word boundary?
///
/// The prefix must be followed by a separator (`-`, `.`, `_`), a digit, or
/// the end of the id, so hub org names like `mistralai` never collide with
/// the bare `mistral` vendor prefix.
fn vendor_prefix(id: &str, prefix: &str) -> bool {
    match id.strip_prefix(prefix) {
        Some(rest) => match rest.chars().next() {
            None => true,
            Some(c) => c == '-' || c == '.' || c == '_' || c.is_ascii_digit(),
        },
        None => false,
    }
}

/// Identify a provider from the model id carried in the body.
///
/// Checked last. Slash-scoped ids are resolved first (explicit hosts, then
/// the OpenRouter fallback, since its catalog spans vendors); bare ids match
/// vendor prefixes only at a word boundary.
pub fn provider_for_model(model: &str) -> Option<ProviderId> {
    let m = model.trim();
    if m.is_empty() {
        return None;
    }
    let lower = m.to_lowercase();

    if BEDROCK_MODEL_RE.is_match(&lower) {
        return Some(ProviderId::Bedrock);
    }
    if lower.starts_with("accounts/fireworks") {
        return Some(ProviderId::Fireworks);
    }
    if lower.starts_with("togethercomputer/") || lower.starts_with("meta-llama/") {
        return Some(ProviderId::Together);
    }
    if lower.starts_with("models/gemini") {
        return Some(ProviderId::Google);
    }
    // Any other org-scoped id (`mistralai/...`, `clauderesearch/...`) is an
    // aggregator catalog entry, not a vendor id.
    if lower.contains('/') {
        return Some(ProviderId::OpenRouter);
    }

    if vendor_prefix(&lower, "gpt")
        || vendor_prefix(&lower, "chatgpt")
        || vendor_prefix(&lower, "o1")
        || vendor_prefix(&lower, "o3")
        || vendor_prefix(&lower, "o4")
    {
        return Some(ProviderId::OpenAi);
    }
    if vendor_prefix(&lower, "claude") {
        return Some(ProviderId::Anthropic);
    }
    if vendor_prefix(&lower, "gemini") {
        return Some(ProviderId::Google);
    }
    if vendor_prefix(&lower, "mistral")
        || vendor_prefix(&lower, "mixtral")
        || vendor_prefix(&lower, "codestral")
        || vendor_prefix(&lower, "ministral")
        || vendor_prefix(&lower, "open-mistral")
        || vendor_prefix(&lower, "open-mixtral")
    {
        return Some(ProviderId::Mistral);
    }
    if vendor_prefix(&lower, "command") {
        return Some(ProviderId::Cohere);
    }
    if vendor_prefix(&lower, "grok") {
        return Some(ProviderId::XAi);
    }
    if vendor_prefix(&lower, "sonar") || vendor_prefix(&lower, "pplx") {
        return Some(ProviderId::Perplexity);
    }
    // Ollama tags look like `llama3:8b`.
    if lower.contains(':') {
        return Some(ProviderId::Ollama);
    }

    None
}

/// Model-hint check for one specific provider.
pub fn model_hints_at(provider: ProviderId, model: &str) -> bool {
    provider_for_model(model) == Some(provider)
}

/// Pull the model id out of a response body, wherever the provider puts it.
pub fn model_from_body(body: &Value) -> Option<&str> {
    body.get("model")
        .or_else(|| body.get("modelId"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_header_view_case_insensitive() {
        let map = headers(&[("Anthropic-Version", "2023-06-01")]);
        let view = HeaderView::new(&map);
        assert_eq!(view.get("anthropic-version"), Some("2023-06-01"));
        assert!(view.contains("ANTHROPIC-VERSION"));
    }

    #[test]
    fn test_provider_for_headers_version_markers() {
        let map = headers(&[("anthropic-version", "2023-06-01")]);
        assert_eq!(
            provider_for_headers(&HeaderView::new(&map)),
            Some(ProviderId::Anthropic)
        );

        let map = headers(&[("openai-version", "2020-10-01")]);
        assert_eq!(
            provider_for_headers(&HeaderView::new(&map)),
            Some(ProviderId::OpenAi)
        );
    }

    #[test]
    fn test_provider_for_headers_token_prefixes() {
        let map = headers(&[("authorization", "Bearer r8_abc123")]);
        assert_eq!(
            provider_for_headers(&HeaderView::new(&map)),
            Some(ProviderId::Replicate)
        );

        let map = headers(&[("x-api-key", "sk-ant-xyz")]);
        assert_eq!(
            provider_for_headers(&HeaderView::new(&map)),
            Some(ProviderId::Anthropic)
        );

        let map = headers(&[("authorization", "Bearer sk-or-v1-abc")]);
        assert_eq!(
            provider_for_headers(&HeaderView::new(&map)),
            Some(ProviderId::OpenRouter)
        );
    }

    #[test]
    fn test_provider_for_headers_miss() {
        let map = headers(&[("content-type", "application/json")]);
        assert_eq!(provider_for_headers(&HeaderView::new(&map)), None);
    }

    #[test]
    fn test_provider_for_url() {
        assert_eq!(
            provider_for_url("https://api.openai.com/v1/chat/completions"),
            Some(ProviderId::OpenAi)
        );
        assert_eq!(
            provider_for_url("https://generativelanguage.googleapis.com/v1beta/models"),
            Some(ProviderId::Google)
        );
        assert_eq!(
            provider_for_url("https://bedrock-runtime.us-east-1.amazonaws.com/model/x/converse"),
            Some(ProviderId::Bedrock)
        );
        assert_eq!(
            provider_for_url("https://streaming.replicate.com/v1/predictions"),
            Some(ProviderId::Replicate)
        );
        assert_eq!(provider_for_url("https://example.com/v1/chat"), None);
    }

    #[test]
    fn test_model_hints() {
        assert_eq!(provider_for_model("gpt-4"), Some(ProviderId::OpenAi));
        assert_eq!(provider_for_model("o1-preview"), Some(ProviderId::OpenAi));
        assert_eq!(
            provider_for_model("claude-3-opus-20240229"),
            Some(ProviderId::Anthropic)
        );
        assert_eq!(provider_for_model("gemini-1.5-pro"), Some(ProviderId::Google));
        assert_eq!(provider_for_model("mixtral-8x7b"), Some(ProviderId::Mistral));
        assert_eq!(
            provider_for_model("command-r-plus"),
            Some(ProviderId::Cohere)
        );
        assert_eq!(provider_for_model("grok-2"), Some(ProviderId::XAi));
        assert_eq!(
            provider_for_model("sonar-medium-online"),
            Some(ProviderId::Perplexity)
        );
        assert_eq!(
            provider_for_model("accounts/fireworks/models/llama-v3"),
            Some(ProviderId::Fireworks)
        );
        assert_eq!(
            provider_for_model("meta-llama/Llama-3-70b-chat-hf"),
            Some(ProviderId::Together)
        );
        assert_eq!(
            provider_for_model("anthropic.claude-3-sonnet-20240229-v1:0"),
            Some(ProviderId::Bedrock)
        );
        assert_eq!(provider_for_model("llama3:8b"), Some(ProviderId::Ollama));
        assert_eq!(
            provider_for_model("some-vendor/custom-model"),
            Some(ProviderId::OpenRouter)
        );
        assert_eq!(provider_for_model(""), None);
        assert_eq!(provider_for_model("mystery-model"), None);
    }

    #[test]
    fn test_hub_orgs_do_not_collide_with_vendor_prefixes() {
        // Hub org names starting with a vendor token stay slash-scoped.
        assert_eq!(
            provider_for_model("mistralai/Mistral-7B-Instruct-v0.3"),
            Some(ProviderId::OpenRouter)
        );
        assert_eq!(
            provider_for_model("clauderesearch/some-model"),
            Some(ProviderId::OpenRouter)
        );
        assert_eq!(
            provider_for_model("geminiproject/chat-tuned"),
            Some(ProviderId::OpenRouter)
        );
        // Bare org names without a separator are not vendor ids either.
        assert_eq!(provider_for_model("mistralai"), None);
        assert_eq!(provider_for_model("commander"), None);
        // Ollama tags win over vendor prefixes for name:tag ids.
        assert_eq!(provider_for_model("mistral:7b"), Some(ProviderId::Ollama));
    }

    #[test]
    fn test_model_from_body() {
        let body = serde_json::json!({"model": "gpt-4"});
        assert_eq!(model_from_body(&body), Some("gpt-4"));

        let body = serde_json::json!({"modelId": "anthropic.claude-3"});
        assert_eq!(model_from_body(&body), Some("anthropic.claude-3"));

        assert_eq!(model_from_body(&serde_json::json!({})), None);
    }
}
