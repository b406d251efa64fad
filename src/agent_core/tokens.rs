//! Token estimation and UTF-8 safe truncation.
//!
//! Uses character-based heuristics calibrated for LLM tokenizers:
//! - English prose: ~3.2 chars/token (conservative)
//! - JSON/structured content: ~2.8 chars/token (denser due to punctuation, short keys)
//!
//! Estimates feed `/stats` only; retention is turn-count based.

use super::types::{Turn, TurnRole};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Average characters per token for JSON/structured content.
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-turn overhead (role label, formatting tokens).
const TURN_OVERHEAD_TOKENS: u32 = 4;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
///
/// If the byte at `max_bytes` is inside a multi-byte character, the slice is
/// shortened to the preceding character boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Public API ─────────────────────────────────────────────────────────────

/// Estimate the token count for a string of natural language text.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.len() as f64;
    (chars / CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for JSON/structured content.
pub fn estimate_json_tokens(json_text: &str) -> u32 {
    let chars = json_text.len() as f64;
    (chars / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for one turn. Tool results are JSON.
pub fn estimate_turn_tokens(turn: &Turn) -> u32 {
    TURN_OVERHEAD_TOKENS
        + match turn.role {
            TurnRole::ToolResult => estimate_json_tokens(&turn.content),
            _ => estimate_tokens(&turn.content),
        }
}

/// Estimate the token count for a whole conversation.
pub fn estimate_conversation_tokens(turns: &[Turn]) -> u32 {
    turns.iter().map(estimate_turn_tokens).sum()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "hello" = 5 chars → ceil(5/3.2) = 2
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn test_estimate_json_tokens() {
        // 16 chars → ceil(16/2.8) = 6
        let json = r#"{"path": "/tmp"}"#;
        assert_eq!(estimate_json_tokens(json), 6);
    }

    #[test]
    fn test_estimate_turn_tokens_by_role() {
        // 4 overhead + ceil(13/3.2) = 5
        assert_eq!(estimate_turn_tokens(&Turn::user("Hello, world!")), 9);
        // 4 overhead + ceil(16/2.8) = 6
        assert_eq!(
            estimate_turn_tokens(&Turn::tool_result(r#"{"path": "/tmp"}"#)),
            10
        );
    }

    #[test]
    fn test_estimate_conversation_tokens_sums() {
        let turns = vec![Turn::system("hello"), Turn::user("hello")];
        assert_eq!(estimate_conversation_tokens(&turns), 12);
    }

    #[test]
    fn test_truncate_utf8_ascii() {
        assert_eq!(truncate_utf8("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_utf8_within_multibyte() {
        // '═' is U+2550, encoded as 3 bytes
        let text = "═══";
        assert_eq!(truncate_utf8(text, 4), "═");
        assert_eq!(truncate_utf8(text, 6), "══");
    }

    #[test]
    fn test_truncate_utf8_no_truncation_needed() {
        assert_eq!(truncate_utf8("short", 100), "short");
    }
}
