//! Error types for the response unification core.
//!
//! This module provides the fatal-failure taxonomy [`ParseError`]. Every
//! public entry point catches these at the parser boundary and reports them
//! through the result envelope; non-fatal conditions travel as warnings and
//! never appear here.

use thiserror::Error;

/// Fatal parse failures.
///
/// Anything that leaves the input unusable maps to one of these variants.
/// Provider API *error documents* are not failures; they parse successfully
/// with the error surfaced as data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Body is not a JSON document the core can route (null, scalar, or
    /// missing every identifying field).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No parser claimed the body and no default provider is configured.
    #[error("no provider could be detected")]
    UnknownProvider,

    /// A forced provider id is not present in the registry.
    #[error("provider not registered: {0}")]
    ProviderNotRegistered(String),

    /// The detected provider's required sub-fields are missing or mistyped.
    #[error("Parse error: {0}")]
    ShapeMismatch(String),

    /// Streaming event is malformed beyond recovery (missing or unknown
    /// event type, unusable event data).
    #[error("stream protocol violation: {0}")]
    StreamProtocolViolation(String),
}

/// Convenience type alias for Results using [`ParseError`].
pub type Result<T> = std::result::Result<T, ParseError>;

impl ParseError {
    /// Short machine-readable tag for metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::InvalidInput(_) => "invalid_input",
            ParseError::UnknownProvider => "unknown_provider",
            ParseError::ProviderNotRegistered(_) => "provider_not_registered",
            ParseError::ShapeMismatch(_) => "shape_mismatch",
            ParseError::StreamProtocolViolation(_) => "stream_protocol_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError::UnknownProvider;
        assert_eq!(err.to_string(), "no provider could be detected");

        let err = ParseError::ProviderNotRegistered("acme".to_string());
        assert_eq!(err.to_string(), "provider not registered: acme");

        let err = ParseError::ShapeMismatch("missing field `choices`".to_string());
        assert_eq!(err.to_string(), "Parse error: missing field `choices`");
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ParseError::UnknownProvider.kind(), "unknown_provider");
        assert_eq!(
            ParseError::StreamProtocolViolation("x".into()).kind(),
            "stream_protocol_violation"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<&'static str> {
            Ok("success")
        }

        assert_eq!(returns_result().unwrap(), "success");
    }
}
