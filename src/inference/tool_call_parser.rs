//! Tool call extraction: finds an embedded invocation in free model text.
//!
//! The model asks for a tool by writing a JSON object anywhere in its reply:
//!
//! ```text
//! Let me check the machine first. {"tool_to_use": "Stat", "parameters": {}}
//! ```
//!
//! Extraction is best-effort and never fails loudly: text with no
//! tool-call-shaped object, or whose first such object is malformed, yields
//! `None` and the reply is treated as a final answer.
//!
//! Matching rules:
//! 1. Candidates are balanced `{…}` spans found by a string-aware scanner,
//!    tried in order of their opening brace.
//! 2. A candidate is tool-call-shaped when `"tool_to_use"` is a key of the
//!    candidate object itself (not of a nested object). Wrappers that only
//!    contain a tool call deeper down are skipped, so the smallest enclosing
//!    object wins.
//! 3. Single-line candidates are tried first; only if none is
//!    tool-call-shaped are multi-line (pretty-printed) candidates tried.
//! 4. Only the first tool-call-shaped candidate is considered. If it does not
//!    parse, or lacks a non-empty string name or an object `parameters`, the
//!    result is `None` even if a later candidate would have been valid.

use serde_json::Value;

use crate::agent_core::types::ToolCallRequest;

/// Wire key holding the tool name.
pub const TOOL_NAME_KEY: &str = "tool_to_use";

/// Wire key holding the parameters mapping.
pub const PARAMETERS_KEY: &str = "parameters";

// ─── Public API ──────────────────────────────────────────────────────────────

/// Extract the tool call requested in `text`, if any.
pub fn extract_tool_call(text: &str) -> Option<ToolCallRequest> {
    let parsed = match find_first_candidate(text, true) {
        Some(span) => parse_candidate(span),
        None => parse_candidate(find_first_candidate(text, false)?),
    };

    if parsed.is_none() {
        tracing::debug!(
            preview = %crate::agent_core::tokens::truncate_utf8(text, 200),
            "tool-call-shaped text did not parse; treating as final answer"
        );
    }
    parsed
}

/// Whether `text` mentions the tool-name key at all.
///
/// Cheap pre-check used for diagnostics; a `true` here does not mean
/// [`extract_tool_call`] will succeed.
pub fn looks_like_tool_call(text: &str) -> bool {
    text.contains(TOOL_NAME_KEY)
}

// ─── Candidate Search ────────────────────────────────────────────────────────

/// Return the first tool-call-shaped `{…}` span.
fn find_first_candidate(text: &str, single_line_only: bool) -> Option<&str> {
    if !looks_like_tool_call(text) {
        return None;
    }
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(|(start, _)| {
            find_matching_brace(text, start).map(|end| &text[start..=end])
        })
        .filter(|span| !single_line_only || !span.contains('\n'))
        .find(|span| has_top_level_key(span, TOOL_NAME_KEY))
}

/// Find the index of the `}` closing the `{` at `start`.
///
/// Braces inside double-quoted strings are ignored; backslash escapes inside
/// strings are honored. Returns `None` when the object never closes.
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether `span` (a balanced object) has `key` as one of its own keys.
///
/// A string counts as a key when it sits at depth 1 and the next
/// non-whitespace byte is `:`.
fn has_top_level_key(span: &str, key: &str) -> bool {
    let bytes = span.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let string_start = i + 1;
                let mut j = string_start;
                let mut escaped = false;
                while j < bytes.len() {
                    if escaped {
                        escaped = false;
                    } else if bytes[j] == b'\\' {
                        escaped = true;
                    } else if bytes[j] == b'"' {
                        break;
                    }
                    j += 1;
                }
                if depth == 1 && &span[string_start..j.min(span.len())] == key {
                    let next = bytes[j.saturating_add(1).min(bytes.len())..]
                        .iter()
                        .find(|b| !b.is_ascii_whitespace());
                    if next == Some(&b':') {
                        return true;
                    }
                }
                i = j + 1;
                continue;
            }
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    false
}

// ─── Candidate Parsing ───────────────────────────────────────────────────────

/// Parse a candidate span into a fully-populated request, or `None`.
fn parse_candidate(span: &str) -> Option<ToolCallRequest> {
    let value: Value = serde_json::from_str(span).ok()?;
    let obj = value.as_object()?;

    let name = obj.get(TOOL_NAME_KEY)?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let parameters = obj.get(PARAMETERS_KEY)?.as_object()?.clone();

    Some(ToolCallRequest::new(name, parameters))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_has_no_tool_call() {
        assert!(extract_tool_call("2 + 2 = 4.").is_none());
        assert!(extract_tool_call("").is_none());
        assert!(extract_tool_call("Use braces like {this} freely.").is_none());
    }

    #[test]
    fn embedded_in_prose() {
        let text = r#"Let me check. {"tool_to_use":"Stat","parameters":{}} One moment."#;
        let req = extract_tool_call(text).unwrap();
        assert_eq!(req.tool_name, "Stat");
        assert!(req.parameters.is_empty());
    }

    #[test]
    fn parameters_preserved_exactly() {
        let text = r#"Sure: {"tool_to_use": "ReadFile", "parameters": {"path": "/tmp/a b.txt", "max_bytes": 10, "opts": {"x": [1, 2]}}}"#;
        let req = extract_tool_call(text).unwrap();
        assert_eq!(req.tool_name, "ReadFile");
        assert_eq!(
            Value::Object(req.parameters),
            json!({"path": "/tmp/a b.txt", "max_bytes": 10, "opts": {"x": [1, 2]}})
        );
    }

    #[test]
    fn pretty_printed_multiline() {
        let text = "I'll read it.\n```json\n{\n  \"tool_to_use\": \"ReadFile\",\n  \"parameters\": {\n    \"path\": \"notes.txt\"\n  }\n}\n```";
        let req = extract_tool_call(text).unwrap();
        assert_eq!(req.tool_name, "ReadFile");
        assert_eq!(req.parameters["path"], "notes.txt");
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"{"tool_to_use":"RunScript","parameters":{"command":"echo '}' \"{\""}}"#;
        let req = extract_tool_call(text).unwrap();
        assert_eq!(req.parameters["command"], "echo '}' \"{\"");
    }

    #[test]
    fn malformed_json_is_none() {
        assert!(extract_tool_call(r#"{"tool_to_use": "Stat", "parameters": {},}"#).is_none());
        assert!(extract_tool_call(r#"{'tool_to_use': 'Stat', 'parameters': {}}"#).is_none());
    }

    #[test]
    fn unbalanced_is_none() {
        assert!(extract_tool_call(r#"{"tool_to_use": "Stat", "parameters": {}"#).is_none());
    }

    #[test]
    fn missing_or_wrong_fields_is_none() {
        assert!(extract_tool_call(r#"{"tool_to_use": "Stat"}"#).is_none());
        assert!(extract_tool_call(r#"{"tool_to_use": "", "parameters": {}}"#).is_none());
        assert!(extract_tool_call(r#"{"tool_to_use": 7, "parameters": {}}"#).is_none());
        assert!(extract_tool_call(r#"{"tool_to_use": "Stat", "parameters": []}"#).is_none());
        assert!(extract_tool_call(r#"{"tool_to_use": "Stat", "parameters": null}"#).is_none());
    }

    #[test]
    fn only_first_call_is_honored() {
        let text = r#"{"tool_to_use":"Stat","parameters":{}} then {"tool_to_use":"ReadFile","parameters":{"path":"x"}}"#;
        assert_eq!(extract_tool_call(text).unwrap().tool_name, "Stat");
    }

    #[test]
    fn malformed_first_call_is_not_skipped() {
        let text = r#"{"tool_to_use":"Stat"} and {"tool_to_use":"ReadFile","parameters":{"path":"x"}}"#;
        assert!(extract_tool_call(text).is_none());
    }

    #[test]
    fn single_line_preferred_over_earlier_multiline() {
        let text = "{\n\"tool_to_use\": \"ReadFile\",\n\"parameters\": {\"path\": \"a\"}\n}\nor {\"tool_to_use\": \"Stat\", \"parameters\": {}}";
        assert_eq!(extract_tool_call(text).unwrap().tool_name, "Stat");
    }

    #[test]
    fn wrapper_object_is_skipped_for_inner_call() {
        let text = r#"{note: "calling", call: {"tool_to_use": "Stat", "parameters": {}}}"#;
        assert_eq!(extract_tool_call(text).unwrap().tool_name, "Stat");
    }

    #[test]
    fn nested_call_inside_parameters_belongs_to_outer() {
        let text = r#"{"tool_to_use":"WriteFile","parameters":{"path":"t.json","content":{"tool_to_use":"Stat","parameters":{}}}}"#;
        let req = extract_tool_call(text).unwrap();
        assert_eq!(req.tool_name, "WriteFile");
    }

    #[test]
    fn key_as_value_is_not_a_call() {
        let text = r#"{"note": "tool_to_use", "parameters": {}}"#;
        assert!(extract_tool_call(text).is_none());
        assert!(looks_like_tool_call(text));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let text = r#"{"tool_to_use":"Stat","parameters":{},"reason":"need numbers"}"#;
        assert_eq!(extract_tool_call(text).unwrap().tool_name, "Stat");
    }

    #[test]
    fn non_ascii_prose_around_call() {
        let text = r#"Überprüfe… {"tool_to_use":"Stat","parameters":{"scope":"système"}} ✓"#;
        let req = extract_tool_call(text).unwrap();
        assert_eq!(req.parameters["scope"], "système");
    }

    #[test]
    fn find_matching_brace_handles_escapes() {
        let text = r#"{"a":"\\"}"#;
        assert_eq!(find_matching_brace(text, 0), Some(text.len() - 1));
        let text = r#"{"a":"\"}"}"#;
        assert_eq!(find_matching_brace(text, 0), Some(text.len() - 1));
    }

    #[test]
    fn find_matching_brace_unclosed() {
        assert_eq!(find_matching_brace("{ {", 0), None);
    }
}
