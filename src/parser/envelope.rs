//! Result envelope for every public operation.
//!
//! Parsers separate fatal failures (errors, no value) from non-fatal
//! findings (warnings, value still delivered). The envelope also carries a
//! detection trace so callers can see how the provider was chosen without
//! re-running heuristics.

use serde::{Deserialize, Serialize};

use crate::core::error::ParseError;
use crate::parser::unified::{Confidence, ProviderId};

/// How a provider was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Header,
    Url,
    ResponseFormat,
    ModelHint,
    Default,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DetectionMethod::Header => "header",
            DetectionMethod::Url => "url",
            DetectionMethod::ResponseFormat => "response_format",
            DetectionMethod::ModelHint => "model_hint",
            DetectionMethod::Default => "default",
        };
        f.write_str(s)
    }
}

/// Detection trace attached to parse envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub method: DetectionMethod,
    pub provider: ProviderId,
    pub confidence: Confidence,
}

/// Result of a standalone detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<DetectionMethod>,
    pub confidence: Confidence,
    /// Debug-mode notes about why candidates won or lost.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl DetectionResult {
    pub fn miss() -> Self {
        DetectionResult {
            detected: false,
            provider: None,
            method: None,
            confidence: Confidence::Low,
            notes: vec![],
        }
    }

    pub fn hit(provider: ProviderId, method: DetectionMethod, confidence: Confidence) -> Self {
        DetectionResult {
            detected: true,
            provider: Some(provider),
            method: Some(method),
            confidence,
            notes: vec![],
        }
    }

    pub fn trace(&self) -> Option<Detection> {
        match (self.provider, self.method) {
            (Some(provider), Some(method)) => Some(Detection {
                method,
                provider,
                confidence: self.confidence,
            }),
            _ => None,
        }
    }
}

/// Structured outcome of a parse operation.
///
/// When `success` is true, `value` is present and well-formed; otherwise
/// `value` is absent and `errors` is non-empty. Warnings accumulate in both
/// cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<Detection>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Outcome {
            success: true,
            value: Some(value),
            warnings: vec![],
            errors: vec![],
            detection: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Outcome {
            success: false,
            value: None,
            warnings: vec![],
            errors: vec![error.into()],
            detection: None,
        }
    }

    pub fn from_error(error: ParseError) -> Self {
        Outcome::fail(error.to_string())
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn warn_all(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_detection(mut self, detection: Option<Detection>) -> Self {
        self.detection = detection;
        self
    }

    /// Map the carried value, preserving diagnostics.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            success: self.success,
            value: self.value.map(f),
            warnings: self.warnings,
            errors: self.errors,
            detection: self.detection,
        }
    }
}
