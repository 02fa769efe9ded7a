//! Lenient JSON parsing for tool-call arguments.
//!
//! Providers stream tool-call arguments as raw JSON fragments, and a stream
//! can end mid-object. This module first attempts a strict parse, then a
//! conservative recovery pass that appends only the closing brackets implied
//! by the unbalanced counts. It never invents commas, quotes, or keys.

use serde_json::Value;

/// How many characters of the offending input to include in warnings.
const WARNING_SNIPPET_LEN: usize = 120;

/// Result of a lenient parse attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LenientJson {
    /// Input parsed strictly.
    Parsed(Value),
    /// Input parsed after appending closing brackets. Callers should warn.
    Recovered(Value),
    /// Input was empty or whitespace-only; treated as an empty object.
    Empty,
    /// Input could not be parsed even after recovery.
    Unparsable,
}

impl LenientJson {
    /// The parsed value, substituting `{}` for empty input.
    pub fn into_value(self) -> Option<Value> {
        match self {
            LenientJson::Parsed(v) | LenientJson::Recovered(v) => Some(v),
            LenientJson::Empty => Some(Value::Object(Default::default())),
            LenientJson::Unparsable => None,
        }
    }

    /// Warning text to attach to the envelope, if any.
    pub fn warning(&self, input: &str) -> Option<String> {
        match self {
            LenientJson::Parsed(_) | LenientJson::Empty => None,
            LenientJson::Recovered(_) => Some("recovered partial JSON".to_string()),
            LenientJson::Unparsable => {
                let snippet: String = input.chars().take(WARNING_SNIPPET_LEN).collect();
                Some(format!("failed to parse JSON arguments: {}", snippet))
            }
        }
    }
}

/// Parse a possibly-truncated JSON string.
///
/// Empty input is a legitimate "no arguments" signal and maps to `{}`
/// without a warning. Truncated input is repaired by appending the `}` / `]`
/// closers implied by the bracket counters; anything worse is reported as
/// unparsable so the caller can suppress the block.
pub fn parse_lenient(input: &str) -> LenientJson {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return LenientJson::Empty;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return LenientJson::Parsed(value);
    }

    if let Some(repaired) = close_brackets(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return LenientJson::Recovered(value);
        }
    }

    LenientJson::Unparsable
}

/// Append the minimum closing tokens implied by unbalanced bracket counts.
///
/// Counts `{` and `[` outside string literals (escape-aware) and pushes the
/// matching closers in nesting order. Returns `None` when the input is
/// balanced already (a repair would not help) or ends inside a string
/// literal (closing the string would be inventing data).
fn close_brackets(input: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                // Mismatched closers make the input unrecoverable here.
                if stack.pop() != Some(ch) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if in_string || stack.is_empty() {
        return None;
    }

    let mut repaired = String::with_capacity(input.len() + stack.len());
    repaired.push_str(input);
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    Some(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_strict_parse() {
        let result = parse_lenient(r#"{"location":"NY"}"#);
        assert_eq!(result, LenientJson::Parsed(json!({"location": "NY"})));
        assert!(result.warning(r#"{"location":"NY"}"#).is_none());
    }

    #[test]
    fn test_empty_input_is_empty_object() {
        assert_eq!(parse_lenient(""), LenientJson::Empty);
        assert_eq!(parse_lenient("   \n\t"), LenientJson::Empty);
        assert_eq!(
            LenientJson::Empty.into_value(),
            Some(json!({}))
        );
    }

    #[test]
    fn test_recover_missing_brace() {
        let input = r#"{"location":"NY""#;
        let result = parse_lenient(input);
        assert_eq!(result, LenientJson::Recovered(json!({"location": "NY"})));
        assert_eq!(
            result.warning(input),
            Some("recovered partial JSON".to_string())
        );
    }

    #[test]
    fn test_recover_nested_brackets() {
        let input = r#"{"items":[1,2,{"a":3"#;
        let result = parse_lenient(input);
        assert_eq!(
            result,
            LenientJson::Recovered(json!({"items": [1, 2, {"a": 3}]}))
        );
    }

    #[test]
    fn test_unterminated_string_is_unparsable() {
        let input = r#"{"location":"NY"#;
        let result = parse_lenient(input);
        assert_matches!(result, LenientJson::Unparsable);
        let warning = result.warning(input).unwrap();
        assert!(warning.starts_with("failed to parse JSON arguments:"));
        assert!(warning.contains(r#"{"location":"NY"#));
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let input = r#"{"text":"open { and [ here""#;
        let result = parse_lenient(input);
        assert_eq!(
            result,
            LenientJson::Recovered(json!({"text": "open { and [ here"}))
        );
    }

    #[test]
    fn test_escaped_quote_handling() {
        let input = r#"{"text":"she said \"hi\"""#;
        let result = parse_lenient(input);
        assert_eq!(
            result,
            LenientJson::Recovered(json!({"text": "she said \"hi\""}))
        );
    }

    #[test]
    fn test_garbage_is_unparsable() {
        assert_eq!(parse_lenient("not json at all"), LenientJson::Unparsable);
        assert_eq!(parse_lenient("}{"), LenientJson::Unparsable);
    }

    #[test]
    fn test_warning_snippet_truncated() {
        let long = format!("{{\"k\":\"{}", "x".repeat(500));
        let result = parse_lenient(&long);
        // Unterminated string: unparsable, and the snippet is capped.
        let warning = result.warning(&long).unwrap();
        let prefix = "failed to parse JSON arguments: ";
        assert!(warning.len() <= prefix.len() + WARNING_SNIPPET_LEN);
    }

    #[test]
    fn test_non_object_values_parse() {
        assert_eq!(parse_lenient("[1,2,3]"), LenientJson::Parsed(json!([1, 2, 3])));
        assert_eq!(parse_lenient("42"), LenientJson::Parsed(json!(42)));
    }
}
