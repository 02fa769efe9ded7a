//! Confidence-annotated stop-reason mapping.
//!
//! Each provider reports its finish indicator in its own vocabulary. The
//! mapper canonicalizes (lowercase, separators stripped) and looks the value
//! up in the provider's table; misses fall through to a keyword scan and
//! finally to `Unknown`. The confidence annotation lets downstream code
//! distinguish recognized from guessed without re-running heuristics.

use crate::parser::unified::{Confidence, ProviderId, StopReason};

/// Result of mapping a provider stop value.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedStopReason {
    pub reason: StopReason,
    pub confidence: Confidence,
    /// False only when nothing matched at all.
    pub recognized: bool,
    /// The raw provider value, when one was present.
    pub original: Option<String>,
    /// Warning to surface for fuzzy or failed matches.
    pub warning: Option<String>,
}

impl MappedStopReason {
    fn exact(reason: StopReason, original: &str) -> Self {
        MappedStopReason {
            reason,
            confidence: Confidence::High,
            recognized: true,
            original: Some(original.to_string()),
            warning: None,
        }
    }
}

/// Map a provider-native finish indicator to a [`StopReason`].
///
/// A null/empty value is a legitimate "not yet known" signal and maps to
/// `Unknown` without a warning. Everything else returns *some* reason.
pub fn map_stop_reason(provider: ProviderId, raw: Option<&str>) -> MappedStopReason {
    let raw = match raw {
        Some(s) if !s.trim().is_empty() => s,
        _ => {
            return MappedStopReason {
                reason: StopReason::Unknown,
                confidence: Confidence::High,
                recognized: true,
                original: None,
                warning: None,
            }
        }
    };

    let canonical = canonicalize(raw);

    if let Some(reason) = exact_match(provider, &canonical) {
        return MappedStopReason::exact(reason, raw);
    }

    if let Some(reason) = keyword_match(&canonical) {
        return MappedStopReason {
            reason,
            confidence: Confidence::Medium,
            recognized: true,
            original: Some(raw.to_string()),
            warning: Some(format!(
                "stop reason \"{}\" fuzzy-matched to {}",
                raw, reason
            )),
        };
    }

    MappedStopReason {
        reason: StopReason::Unknown,
        confidence: Confidence::Low,
        recognized: false,
        original: Some(raw.to_string()),
        warning: Some(format!("unknown stop reason: {}", raw)),
    }
}

/// Lowercase and collapse `_` / `-` so `end_turn`, `END-TURN`, and
/// `endTurn` all compare equal.
fn canonicalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn exact_match(provider: ProviderId, canonical: &str) -> Option<StopReason> {
    let table: &[(&str, StopReason)] = match provider {
        ProviderId::OpenAi
        | ProviderId::XAi
        | ProviderId::Perplexity
        | ProviderId::Fireworks
        | ProviderId::OpenRouter => &[
            ("stop", StopReason::EndTurn),
            ("length", StopReason::MaxTokens),
            ("toolcalls", StopReason::ToolUse),
            ("functioncall", StopReason::ToolUse),
            ("contentfilter", StopReason::ContentFilter),
        ],
        ProviderId::Mistral => &[
            ("stop", StopReason::EndTurn),
            ("length", StopReason::MaxTokens),
            ("modellength", StopReason::ContextLength),
            ("toolcalls", StopReason::ToolUse),
        ],
        ProviderId::Anthropic => &[
            ("endturn", StopReason::EndTurn),
            ("maxtokens", StopReason::MaxTokens),
            ("stopsequence", StopReason::StopSequence),
            ("tooluse", StopReason::ToolUse),
        ],
        ProviderId::Google => &[
            ("stop", StopReason::EndTurn),
            ("maxtokens", StopReason::MaxTokens),
            ("safety", StopReason::ContentFilter),
            ("recitation", StopReason::Recitation),
            ("other", StopReason::Unknown),
        ],
        ProviderId::Cohere => &[
            ("complete", StopReason::EndTurn),
            ("maxtokens", StopReason::MaxTokens),
            ("error", StopReason::Error),
            ("errortoxic", StopReason::ContentFilter),
        ],
        ProviderId::Together | ProviderId::HuggingFace => &[
            ("eos", StopReason::EndTurn),
            ("eostoken", StopReason::EndTurn),
            ("stop", StopReason::EndTurn),
            ("length", StopReason::MaxTokens),
        ],
        ProviderId::Replicate => &[
            ("succeeded", StopReason::EndTurn),
            ("failed", StopReason::Error),
            ("canceled", StopReason::Canceled),
            ("aborted", StopReason::Canceled),
        ],
        ProviderId::Bedrock => &[
            ("endturn", StopReason::EndTurn),
            ("maxtokens", StopReason::MaxTokens),
            ("stopsequence", StopReason::StopSequence),
            ("tooluse", StopReason::ToolUse),
            ("contentfiltered", StopReason::ContentFilter),
            ("guardrailintervened", StopReason::ContentFilter),
        ],
        ProviderId::Ollama => &[
            ("stop", StopReason::EndTurn),
            ("length", StopReason::MaxTokens),
        ],
    };

    table
        .iter()
        .find(|(key, _)| *key == canonical)
        .map(|(_, reason)| *reason)
}

/// Substring scan for unrecognized values. Checked most-specific first so
/// `max_token_limit` hits `maxtoken` before `stop` could ever apply.
fn keyword_match(canonical: &str) -> Option<StopReason> {
    const KEYWORDS: &[(&str, StopReason)] = &[
        ("contentfilter", StopReason::ContentFilter),
        ("safety", StopReason::ContentFilter),
        ("moderation", StopReason::ContentFilter),
        ("recitation", StopReason::Recitation),
        ("contextlength", StopReason::ContextLength),
        ("toolcall", StopReason::ToolUse),
        ("tooluse", StopReason::ToolUse),
        ("functioncall", StopReason::ToolUse),
        ("maxtoken", StopReason::MaxTokens),
        ("length", StopReason::MaxTokens),
        ("stopsequence", StopReason::StopSequence),
        ("endturn", StopReason::EndTurn),
        ("stop", StopReason::EndTurn),
        ("eos", StopReason::EndTurn),
        ("complete", StopReason::EndTurn),
        ("cancel", StopReason::Canceled),
        ("abort", StopReason::Canceled),
        ("error", StopReason::Error),
    ];

    KEYWORDS
        .iter()
        .find(|(keyword, _)| canonical.contains(keyword))
        .map(|(_, reason)| *reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_openai_table() {
        let mapped = map_stop_reason(ProviderId::OpenAi, Some("stop"));
        assert_eq!(mapped.reason, StopReason::EndTurn);
        assert_eq!(mapped.confidence, Confidence::High);
        assert!(mapped.recognized);
        assert!(mapped.warning.is_none());

        assert_eq!(
            map_stop_reason(ProviderId::OpenAi, Some("tool_calls")).reason,
            StopReason::ToolUse
        );
        assert_eq!(
            map_stop_reason(ProviderId::OpenAi, Some("function_call")).reason,
            StopReason::ToolUse
        );
        assert_eq!(
            map_stop_reason(ProviderId::OpenAi, Some("content_filter")).reason,
            StopReason::ContentFilter
        );
    }

    #[test]
    fn test_case_and_separator_insensitive() {
        assert_eq!(
            map_stop_reason(ProviderId::Anthropic, Some("END-TURN")).reason,
            StopReason::EndTurn
        );
        assert_eq!(
            map_stop_reason(ProviderId::Anthropic, Some("endTurn")).reason,
            StopReason::EndTurn
        );
        assert_eq!(
            map_stop_reason(ProviderId::Anthropic, Some("end_turn")).confidence,
            Confidence::High
        );
    }

    #[test]
    fn test_google_table() {
        assert_eq!(
            map_stop_reason(ProviderId::Google, Some("STOP")).reason,
            StopReason::EndTurn
        );
        assert_eq!(
            map_stop_reason(ProviderId::Google, Some("SAFETY")).reason,
            StopReason::ContentFilter
        );
        let mapped = map_stop_reason(ProviderId::Google, Some("RECITATION"));
        assert_eq!(mapped.reason, StopReason::Recitation);
        assert_eq!(mapped.confidence, Confidence::High);
        assert!(mapped.warning.is_none());

        // OTHER maps to Unknown at full confidence: Google defined it.
        let mapped = map_stop_reason(ProviderId::Google, Some("OTHER"));
        assert_eq!(mapped.reason, StopReason::Unknown);
        assert_eq!(mapped.confidence, Confidence::High);
    }

    #[test]
    fn test_mistral_context_length() {
        assert_eq!(
            map_stop_reason(ProviderId::Mistral, Some("model_length")).reason,
            StopReason::ContextLength
        );
    }

    #[test]
    fn test_cohere_table() {
        assert_eq!(
            map_stop_reason(ProviderId::Cohere, Some("COMPLETE")).reason,
            StopReason::EndTurn
        );
        assert_eq!(
            map_stop_reason(ProviderId::Cohere, Some("ERROR_TOXIC")).reason,
            StopReason::ContentFilter
        );
    }

    #[test]
    fn test_together_eos_token() {
        assert_eq!(
            map_stop_reason(ProviderId::Together, Some("eos_token")).reason,
            StopReason::EndTurn
        );
        assert_eq!(
            map_stop_reason(ProviderId::HuggingFace, Some("eos")).reason,
            StopReason::EndTurn
        );
    }

    #[test]
    fn test_replicate_table() {
        assert_eq!(
            map_stop_reason(ProviderId::Replicate, Some("succeeded")).reason,
            StopReason::EndTurn
        );
        assert_eq!(
            map_stop_reason(ProviderId::Replicate, Some("aborted")).reason,
            StopReason::Canceled
        );
        assert_eq!(
            map_stop_reason(ProviderId::Replicate, Some("failed")).reason,
            StopReason::Error
        );
    }

    #[test]
    fn test_fuzzy_match_warns() {
        let mapped = map_stop_reason(ProviderId::OpenAi, Some("custom_stop_marker"));
        assert_eq!(mapped.reason, StopReason::EndTurn);
        assert_eq!(mapped.confidence, Confidence::Medium);
        assert!(mapped.recognized);
        assert!(mapped.warning.unwrap().contains("fuzzy-matched"));
    }

    #[test]
    fn test_fuzzy_prefers_specific_keyword() {
        // Contains both "maxtoken" and "stop"-free text; the specific
        // keyword must win over any later generic one.
        let mapped = map_stop_reason(ProviderId::OpenAi, Some("max_token_limit_hit"));
        assert_eq!(mapped.reason, StopReason::MaxTokens);
    }

    #[test]
    fn test_unrecognized_is_unknown() {
        let mapped = map_stop_reason(ProviderId::OpenAi, Some("xyzzy"));
        assert_eq!(mapped.reason, StopReason::Unknown);
        assert_eq!(mapped.confidence, Confidence::Low);
        assert!(!mapped.recognized);
        assert_eq!(mapped.warning.unwrap(), "unknown stop reason: xyzzy");
    }

    #[test]
    fn test_null_and_empty_are_legitimate() {
        for raw in [None, Some(""), Some("   ")] {
            let mapped = map_stop_reason(ProviderId::Anthropic, raw);
            assert_eq!(mapped.reason, StopReason::Unknown);
            assert!(mapped.recognized);
            assert!(mapped.warning.is_none());
            assert!(mapped.original.is_none());
        }
    }

    #[test]
    fn test_totality_over_arbitrary_strings() {
        // Smoke check; the property test covers the full space.
        for raw in ["", "🤖", "reason-42", "STOP!!", "\u{0}"] {
            let _ = map_stop_reason(ProviderId::Google, Some(raw));
        }
    }
}
