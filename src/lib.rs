//! Provider-agnostic LLM response normalization.
//!
//! This library accepts already-decoded JSON from any supported LLM HTTP
//! API (plus optional transport headers and the request URL) and produces a
//! single unified response shape, so downstream code never branches on
//! provider identity. Features:
//!
//! - **Auto-detection**: provider identified from headers, URL, response
//!   shape, or model id, in that priority order
//! - **Fourteen providers**: OpenAI, Anthropic, Mistral, Google Gemini,
//!   Cohere, xAI, Perplexity, Together, Fireworks, OpenRouter, Bedrock,
//!   Ollama, HuggingFace, and Replicate
//! - **Streaming**: per-stream accumulation of text and fragmented
//!   tool-call arguments, with conservative partial-JSON recovery
//! - **Errors as data**: provider error documents parse successfully with
//!   the error surfaced on the unified response
//! - **Diagnostics**: every call returns an envelope carrying warnings and
//!   the detection trace
//!
//! # Architecture
//!
//! The crate is organized into two layers:
//!
//! - [`core`]: shared machinery (errors, lenient JSON parsing, stream
//!   state, config, logging, metrics)
//! - [`parser`]: the unified data model, per-provider parsers, and the
//!   provider registry
//!
//! # Quick start
//!
//! ```
//! use serde_json::json;
//!
//! let body = json!({
//!     "id": "chatcmpl-1",
//!     "object": "chat.completion",
//!     "model": "gpt-4",
//!     "choices": [{
//!         "index": 0,
//!         "message": {"role": "assistant", "content": "hi"},
//!         "finish_reason": "stop"
//!     }],
//!     "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
//! });
//!
//! let outcome = llm_unify::parse_response(&body, None, None, None);
//! assert!(outcome.success);
//! let unified = outcome.value.unwrap();
//! assert_eq!(unified.provider, llm_unify::ProviderId::OpenAi);
//! assert_eq!(unified.messages[0].text_content(), "hi");
//! ```
//!
//! The core performs no I/O: no network requests, no retries, no caching.
//! Error classification only *describes* whether a retry would help.

pub mod core;
pub mod parser;

// Re-export commonly used types for convenience
pub use crate::core::{
    init_logging, LenientJson, ParseError, ParserConfig, Result, StreamState, StreamingMetrics,
};
pub use parser::{
    map_stop_reason, parse_response, parse_stream, register_all_providers, register_provider,
    registry, registry_mut, reset_registry, Capabilities, Confidence, ContentBlock, Delta,
    Detection, DetectionMethod, DetectionResult, ErrorInfo, ErrorType, HeaderView,
    MappedStopReason, Message, ModelInfo, Outcome, ProviderId, ProviderMetadata, ProviderParser,
    ProviderRegistry, RetryAdvice, Role, StopReason, StreamSession, TokenUsage, UnifiedResponse,
    UnifiedStreamChunk, UnifiedStreamResponse,
};
