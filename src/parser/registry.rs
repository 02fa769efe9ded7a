//! Provider registry and process-default entry points.
//!
//! The registry owns the parser set, runs detection (headers → URL → shape
//! → model hint, first positive per pass, passes ranked by specificity),
//! and dispatches parsing. A library-owned default registry backs the
//! crate-level [`parse_response`] / [`parse_stream`] helpers; tests and
//! multi-tenant callers can construct their own registries instead of
//! sharing it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::core::config::ParserConfig;
use crate::core::error::ParseError;
use crate::core::metrics::get_metrics;
use crate::core::stream_state::{StreamState, MAX_STREAM_BUFFER_SIZE};
use crate::parser::anthropic::AnthropicParser;
use crate::parser::bedrock::BedrockParser;
use crate::parser::cohere::CohereParser;
use crate::parser::detector::{model_from_body, HeaderView};
use crate::parser::envelope::{DetectionMethod, DetectionResult, Outcome};
use crate::parser::google::GoogleParser;
use crate::parser::huggingface::HuggingFaceParser;
use crate::parser::ollama::OllamaParser;
use crate::parser::openai::OpenAiCompatParser;
use crate::parser::replicate::ReplicateParser;
use crate::parser::unified::{
    Confidence, ProviderId, ProviderMetadata, UnifiedResponse, UnifiedStreamResponse,
};
use crate::parser::{check_routable, ProviderParser, StreamSession};

use std::sync::Arc;

/// Registry of provider parsers.
pub struct ProviderRegistry {
    parsers: Vec<Arc<dyn ProviderParser>>,
    default_provider: Option<ProviderId>,
    debug: bool,
    stream_buffer_limit: usize,
}

impl ProviderRegistry {
    /// Create an empty registry (for testing and custom assemblies).
    pub fn empty() -> Self {
        ProviderRegistry {
            parsers: Vec::new(),
            default_provider: None,
            debug: false,
            stream_buffer_limit: MAX_STREAM_BUFFER_SIZE,
        }
    }

    /// Create a registry with every built-in parser registered in
    /// detection-priority order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(AnthropicParser::new()));
        registry.register(Arc::new(GoogleParser::new()));
        registry.register(Arc::new(CohereParser::new()));
        registry.register(Arc::new(ReplicateParser::new()));
        registry.register(Arc::new(OllamaParser::new()));
        registry.register(Arc::new(BedrockParser::new()));
        registry.register(Arc::new(HuggingFaceParser::new()));
        registry.register(Arc::new(OpenAiCompatParser::mistral()));
        registry.register(Arc::new(OpenAiCompatParser::xai()));
        registry.register(Arc::new(OpenAiCompatParser::perplexity()));
        registry.register(Arc::new(OpenAiCompatParser::together()));
        registry.register(Arc::new(OpenAiCompatParser::fireworks()));
        registry.register(Arc::new(OpenAiCompatParser::openrouter()));
        registry.register(Arc::new(OpenAiCompatParser::openai()));
        registry
    }

    /// Defaults plus knobs from the environment.
    pub fn from_config(config: &ParserConfig) -> Self {
        let mut registry = Self::with_defaults();
        registry.debug = config.debug_detection;
        registry.stream_buffer_limit = config.max_stream_buffer;
        registry.default_provider = config
            .default_provider
            .as_deref()
            .and_then(|s| s.parse().ok());
        registry
    }

    /// Register a parser, replacing any existing parser with the same id.
    pub fn register(&mut self, parser: Arc<dyn ProviderParser>) {
        match self.parsers.iter_mut().find(|p| p.id() == parser.id()) {
            Some(slot) => *slot = parser,
            None => self.parsers.push(parser),
        }
    }

    /// Remove a parser. Returns whether one was present.
    pub fn unregister(&mut self, id: ProviderId) -> bool {
        let before = self.parsers.len();
        self.parsers.retain(|p| p.id() != id);
        self.parsers.len() != before
    }

    pub fn is_registered(&self, id: ProviderId) -> bool {
        self.parsers.iter().any(|p| p.id() == id)
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn ProviderParser>> {
        self.parsers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn get_providers(&self) -> Vec<ProviderId> {
        self.parsers.iter().map(|p| p.id()).collect()
    }

    pub fn get_metadata(&self, id: ProviderId) -> Option<ProviderMetadata> {
        self.get(id).map(|p| p.metadata())
    }

    pub fn get_all_metadata(&self) -> Vec<ProviderMetadata> {
        self.parsers.iter().map(|p| p.metadata()).collect()
    }

    pub fn set_default_provider(&mut self, provider: Option<ProviderId>) {
        self.default_provider = provider;
    }

    /// Emit detection-trace warnings on every parse.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Detect the provider from all available signals.
    ///
    /// Signals rank header > URL > shape > model hint; within one signal,
    /// registration order breaks ties. The result is deterministic for a
    /// given input.
    pub fn detect_provider(
        &self,
        body: &Value,
        headers: Option<&HashMap<String, String>>,
        url: Option<&str>,
    ) -> DetectionResult {
        let mut positives: Vec<(DetectionMethod, ProviderId)> = Vec::new();

        if let Some(h) = headers {
            let view = HeaderView::new(h);
            for parser in &self.parsers {
                if parser.detect_headers(&view) {
                    positives.push((DetectionMethod::Header, parser.id()));
                }
            }
        }
        if let Some(u) = url {
            for parser in &self.parsers {
                if parser.detect_url(u) {
                    positives.push((DetectionMethod::Url, parser.id()));
                }
            }
        }
        for parser in &self.parsers {
            if parser.detect_shape(body) {
                positives.push((DetectionMethod::ResponseFormat, parser.id()));
            }
        }
        if let Some(model) = model_from_body(body) {
            for parser in &self.parsers {
                if parser.detect_model_hint(model) {
                    positives.push((DetectionMethod::ModelHint, parser.id()));
                }
            }
        }

        let winner = positives.first().copied();
        let mut result = match winner {
            Some((method, provider)) => {
                let confidence = match method {
                    DetectionMethod::Header | DetectionMethod::Url => Confidence::High,
                    DetectionMethod::ResponseFormat | DetectionMethod::ModelHint => {
                        Confidence::Medium
                    }
                    DetectionMethod::Default => Confidence::Low,
                };
                DetectionResult::hit(provider, method, confidence)
            }
            None => match self.default_provider {
                Some(provider) => {
                    DetectionResult::hit(provider, DetectionMethod::Default, Confidence::Low)
                }
                None => DetectionResult::miss(),
            },
        };

        if self.debug {
            if let Some((method, provider)) = winner {
                result
                    .notes
                    .push(format!("detected {} via {}", provider, method));
                for (lost_method, lost) in positives.iter().skip(1) {
                    result.notes.push(format!(
                        "candidate {} ({}) lost to {} ({})",
                        lost, lost_method, provider, method
                    ));
                }
            } else if let Some(provider) = self.default_provider {
                result
                    .notes
                    .push(format!("no signal matched; defaulted to {}", provider));
            }
        }

        result
    }

    /// Parse a complete response body.
    ///
    /// A forced provider bypasses detection entirely; otherwise the
    /// detected parser is dispatched and the detection trace attached.
    pub fn parse(
        &self,
        body: &Value,
        forced: Option<ProviderId>,
        headers: Option<&HashMap<String, String>>,
        url: Option<&str>,
    ) -> Outcome<UnifiedResponse> {
        let started = Instant::now();

        if let Err(e) = check_routable(body) {
            return self.finish(None, Outcome::from_error(e), started);
        }

        let resolved = match self.resolve(body, forced, headers, url) {
            Ok(resolved) => resolved,
            Err(e) => return self.finish(None, Outcome::from_error(e), started),
        };

        let provider = resolved.parser.id();
        let mut outcome = resolved
            .parser
            .parse(body)
            .with_detection(resolved.detection);
        outcome.warnings.splice(0..0, resolved.notes);
        self.finish(Some(provider), outcome, started)
    }

    /// Parse a single streaming chunk with a transient state.
    ///
    /// Cross-chunk accumulation (fragmented tool calls, text growth) needs
    /// a [`StreamSession`] from [`open_stream`](Self::open_stream); this
    /// entry point serves callers inspecting chunks in isolation.
    pub fn parse_stream(
        &self,
        chunk: &Value,
        forced: Option<ProviderId>,
        headers: Option<&HashMap<String, String>>,
        url: Option<&str>,
    ) -> Outcome<UnifiedStreamResponse> {
        if let Err(e) = check_routable(chunk) {
            return Outcome::from_error(e);
        }

        let resolved = match self.resolve(chunk, forced, headers, url) {
            Ok(resolved) => resolved,
            Err(e) => return Outcome::from_error(e),
        };

        let provider = resolved.parser.id();
        get_metrics()
            .stream_chunks_total
            .with_label_values(&[provider.as_str()])
            .inc();

        let mut state = StreamState::with_buffer_limit(self.stream_buffer_limit);
        let mut outcome = resolved
            .parser
            .parse_stream(chunk, &mut state)
            .with_detection(resolved.detection);
        outcome.warnings.splice(0..0, resolved.notes);
        for warning in &outcome.warnings {
            tracing::warn!(provider = %provider, "{}", warning);
        }
        outcome
    }

    /// Open a stateful session for one logical stream.
    pub fn open_stream(
        &self,
        provider: ProviderId,
    ) -> Result<StreamSession, ParseError> {
        self.get(provider)
            .map(|parser| StreamSession::new(parser, self.stream_buffer_limit))
            .ok_or_else(|| ParseError::ProviderNotRegistered(provider.to_string()))
    }

    /// Detect, then open a session for the detected provider.
    pub fn open_stream_detected(
        &self,
        first_chunk: &Value,
        headers: Option<&HashMap<String, String>>,
        url: Option<&str>,
    ) -> Result<StreamSession, ParseError> {
        let detection = self.detect_provider(first_chunk, headers, url);
        match detection.provider {
            Some(provider) => self.open_stream(provider),
            None => Err(ParseError::UnknownProvider),
        }
    }

    fn resolve(
        &self,
        body: &Value,
        forced: Option<ProviderId>,
        headers: Option<&HashMap<String, String>>,
        url: Option<&str>,
    ) -> Result<ResolvedDispatch, ParseError> {
        match forced {
            Some(id) => match self.get(id) {
                Some(parser) => Ok(ResolvedDispatch {
                    parser,
                    detection: None,
                    notes: vec![],
                }),
                None => Err(ParseError::ProviderNotRegistered(id.to_string())),
            },
            None => {
                let detection = self.detect_provider(body, headers, url);
                match detection.provider.and_then(|id| self.get(id)) {
                    Some(parser) => {
                        tracing::debug!(
                            provider = %parser.id(),
                            method = %detection.method.map(|m| m.to_string()).unwrap_or_default(),
                            "provider detected"
                        );
                        Ok(ResolvedDispatch {
                            parser,
                            detection: detection.trace(),
                            notes: detection.notes,
                        })
                    }
                    None => Err(ParseError::UnknownProvider),
                }
            }
        }
    }

    fn finish<T>(
        &self,
        provider: Option<ProviderId>,
        outcome: Outcome<T>,
        started: Instant,
    ) -> Outcome<T> {
        let metrics = get_metrics();
        let label = provider.map(|p| p.as_str()).unwrap_or("unknown");
        let outcome_label = if outcome.success { "ok" } else { "error" };
        metrics
            .parse_total
            .with_label_values(&[label, outcome_label])
            .inc();
        metrics
            .parse_duration
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        if let Some(detection) = &outcome.detection {
            let method = detection.method.to_string();
            metrics
                .detection_total
                .with_label_values(&[method.as_str(), detection.provider.as_str()])
                .inc();
        }
        for warning in &outcome.warnings {
            tracing::warn!(provider = label, "{}", warning);
        }
        for error in &outcome.errors {
            tracing::debug!(provider = label, "parse failed: {}", error);
        }
        outcome
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// A dispatch target plus the detection evidence that chose it.
struct ResolvedDispatch {
    parser: Arc<dyn ProviderParser>,
    detection: Option<crate::parser::envelope::Detection>,
    notes: Vec<String>,
}

// ============================================================================
// Process-default registry
// ============================================================================

static DEFAULT_REGISTRY: Lazy<RwLock<ProviderRegistry>> =
    Lazy::new(|| RwLock::new(ProviderRegistry::from_config(&ParserConfig::from_env())));

/// Shared read access to the process-default registry.
pub fn registry() -> RwLockReadGuard<'static, ProviderRegistry> {
    DEFAULT_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive access to the process-default registry, for registration and
/// configuration. Registration must not race parsing; hold this guard only
/// briefly.
pub fn registry_mut() -> RwLockWriteGuard<'static, ProviderRegistry> {
    DEFAULT_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Parse a response body through the default registry.
pub fn parse_response(
    body: &Value,
    forced: Option<ProviderId>,
    headers: Option<&HashMap<String, String>>,
    url: Option<&str>,
) -> Outcome<UnifiedResponse> {
    registry().parse(body, forced, headers, url)
}

/// Parse a stream chunk through the default registry.
pub fn parse_stream(
    chunk: &Value,
    forced: Option<ProviderId>,
    headers: Option<&HashMap<String, String>>,
    url: Option<&str>,
) -> Outcome<UnifiedStreamResponse> {
    registry().parse_stream(chunk, forced, headers, url)
}

/// Register a parser in the default registry.
pub fn register_provider(parser: Arc<dyn ProviderParser>) {
    registry_mut().register(parser);
}

/// Restore the default registry to its initial state (testing).
pub fn reset_registry() {
    *registry_mut() = ProviderRegistry::from_config(&ParserConfig::from_env());
}

/// Ensure every built-in parser is registered in the default registry.
pub fn register_all_providers() {
    let mut guard = registry_mut();
    let defaults = ProviderRegistry::with_defaults();
    for id in defaults.get_providers() {
        if !guard.is_registered(id) {
            if let Some(parser) = defaults.get(id) {
                guard.register(parser);
            }
        }
    }
}
