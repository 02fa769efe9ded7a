//! Configuration loaded from environment variables.
//!
//! The core itself is pure; the only knobs are how the default registry is
//! assembled. Variables are read with the `LLM_UNIFY` prefix (a `.env` file
//! is honored when present):
//!
//! - `LLM_UNIFY_DEFAULT_PROVIDER`: provider id to fall back to when
//!   detection finds nothing (e.g. `openai`). Unset means detection
//!   failures are fatal.
//! - `LLM_UNIFY_DEBUG_DETECTION`: `true` to emit detection-trace warnings.
//! - `LLM_UNIFY_MAX_STREAM_BUFFER`: stream buffer warning threshold in
//!   bytes.

use serde::Deserialize;

use crate::core::stream_state::MAX_STREAM_BUFFER_SIZE;

/// Registry construction knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Provider id used when detection fails. Must name a registered
    /// parser to take effect.
    pub default_provider: Option<String>,

    /// Emit warnings describing which detection method fired and why
    /// competing candidates lost.
    pub debug_detection: bool,

    /// Stream buffer warning threshold in bytes.
    pub max_stream_buffer: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            default_provider: None,
            debug_detection: false,
            max_stream_buffer: MAX_STREAM_BUFFER_SIZE,
        }
    }
}

impl ParserConfig {
    /// Load configuration from the environment.
    ///
    /// Unset or malformed variables fall back to defaults; configuration
    /// can never make parsing fail.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let loaded = config::Config::builder()
            .add_source(config::Environment::with_prefix("LLM_UNIFY"))
            .build()
            .and_then(|c| c.try_deserialize::<ParserConfig>());

        match loaded {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::debug!(error = %e, "using default parser config");
                ParserConfig::default()
            }
        }
    }
}
