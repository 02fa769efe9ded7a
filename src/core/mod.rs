//! Shared machinery for the unification core.
//!
//! This module contains components used by every provider parser:
//! - Error taxonomy
//! - Lenient JSON parsing for tool-call arguments
//! - Stream accumulation state
//! - Configuration, logging, and metrics

pub mod config;
pub mod error;
pub mod json_repair;
pub mod logging;
pub mod metrics;
pub mod stream_state;

// Re-export commonly used types
pub use config::ParserConfig;
pub use error::{ParseError, Result};
pub use json_repair::{parse_lenient, LenientJson};
pub use logging::init_logging;
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use stream_state::{
    CompletedToolCall, PartialToolCall, StreamState, StreamingMetrics, MAX_STREAM_BUFFER_SIZE,
};
