//! Template-based plan decomposition for known multi-step requests.
//!
//! Before a request reaches the model, the session checks it against a few
//! keyword templates. A match yields a pre-built `Plan` that goes to the plan
//! gate instead of the model loop. The tables below are data; the only logic
//! is group scoring and path-hint extraction.
//!
//! Confidence is the share of a template's keyword groups that matched.

use serde_json::{json, Map, Value};

use super::types::{Plan, PlanStep, ToolCallRequest};

/// Minimum matched keyword groups for any template.
const MIN_MATCHED_GROUPS: usize = 3;

// ─── Keyword Tables ─────────────────────────────────────────────────────────

// Terms match whole words (multi-word terms match consecutive words).

const BACKUP_GROUPS: &[&[&str]] = &[
    &["backup", "back up", "snapshot", "copy of"],
    &["file", "config", "document", "notes", "folder", "directory"],
    &["before", "safe", "keep", "preserve", "first"],
];

const TIDY_GROUPS: &[&[&str]] = &[
    &["clean", "tidy", "remove", "delete", "purge", "clear out", "get rid of"],
    &["temp", "tmp", "temporary", "scratch"],
    &["file", "files", "folder", "directory"],
    &["old", "stale", "week", "weeks", "days", "month", "months"],
    &["space", "disk", "storage"],
    &["leftover", "leftovers", "junk", "clutter", "cache"],
];

const HEALTH_GROUPS: &[&[&str]] = &[
    &["health", "report", "overview", "diagnostics"],
    &["cpu", "memory", "ram", "load", "resources", "processes", "uptime"],
    &["machine", "computer", "host", "server", "folder", "directory", "disk"],
];

// ─── Public API ─────────────────────────────────────────────────────────────

/// Match the request against the templates.
///
/// Returns `None` when no template scores at least three groups; the request
/// then goes to the model loop.
pub fn try_template_match(user_message: &str) -> Option<Plan> {
    let lower = user_message.to_lowercase();
    let words = words(&lower);
    let path = extract_path_hint(user_message);

    // Backup is checked first: its wording ("copy of", "file") overlaps the
    // others, and it needs an explicit path.
    let score = keyword_score(&words, BACKUP_GROUPS);
    if score >= MIN_MATCHED_GROUPS {
        if let Some(path) = path.as_deref() {
            tracing::info!(score, "template match: file backup");
            return Some(build_backup_template(path, confidence(score, BACKUP_GROUPS)));
        }
    }

    let score = keyword_score(&words, TIDY_GROUPS);
    if score >= MIN_MATCHED_GROUPS {
        tracing::info!(score, "template match: tidy temp files");
        let path = path.as_deref().unwrap_or("/tmp");
        return Some(build_tidy_template(path, confidence(score, TIDY_GROUPS)));
    }

    let score = keyword_score(&words, HEALTH_GROUPS);
    if score >= MIN_MATCHED_GROUPS {
        tracing::info!(score, "template match: system health report");
        let path = path.as_deref().unwrap_or("~");
        return Some(build_health_template(path, confidence(score, HEALTH_GROUPS)));
    }

    None
}

/// Score a message against keyword groups.
///
/// Each group is a set of synonymous terms. A group is "matched" if ANY term
/// in it appears in the message as whole words. Returns the count of matched
/// groups.
fn keyword_score(words: &[&str], groups: &[&[&str]]) -> usize {
    groups
        .iter()
        .filter(|group| group.iter().any(|term| contains_term(words, term)))
        .count()
}

/// Split lowercased text into alphanumeric words.
fn words(lower_message: &str) -> Vec<&str> {
    lower_message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn contains_term(words: &[&str], term: &str) -> bool {
    let parts: Vec<&str> = term.split(' ').collect();
    words.windows(parts.len()).any(|window| window == parts.as_slice())
}

fn confidence(score: usize, groups: &[&[&str]]) -> f64 {
    score as f64 / groups.len() as f64
}

/// Extract a file/directory path hint from the user message.
///
/// Backtick-quoted paths win, then absolute or home-relative words, then a
/// few well-known folder names.
pub(crate) fn extract_path_hint(text: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(start) = text[search_from..].find('`') {
        let abs_start = search_from + start + 1;
        let Some(end) = text[abs_start..].find('`') else {
            break;
        };
        let content = &text[abs_start..abs_start + end];
        if content.contains('/') {
            return Some(content.to_string());
        }
        search_from = abs_start + end + 1;
    }

    for word in text.split_whitespace() {
        let clean = word.trim_matches(|c: char| {
            matches!(c, '`' | '\'' | '"' | ',' | ')' | '(' | '?' | '!')
        });
        let clean = clean.strip_suffix('.').unwrap_or(clean);
        if (clean.starts_with('/') || clean.starts_with("~/")) && clean.len() > 1 {
            return Some(clean.to_string());
        }
    }

    let lower = text.to_lowercase();
    if lower.contains("downloads folder") || lower.contains("my downloads") {
        return Some("~/Downloads".to_string());
    }
    if lower.contains("documents folder") || lower.contains("my documents") {
        return Some("~/Documents".to_string());
    }
    if lower.contains("desktop folder") || lower.contains("my desktop") {
        return Some("~/Desktop".to_string());
    }
    if lower.contains("home folder") || lower.contains("home directory") {
        return Some("~".to_string());
    }

    None
}

// ─── Template Builders ──────────────────────────────────────────────────────

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Single-quote `s` for `sh -c`.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Backup: read the file → copy it next to itself → list the folder.
fn build_backup_template(path: &str, confidence: f64) -> Plan {
    let backup = format!("{path}.bak");
    let parent = match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => path[..i].to_string(),
        None => ".".to_string(),
    };
    Plan::new(
        format!("Back up {path}"),
        vec![
            PlanStep::tool(
                format!("Read {path} to confirm it exists and is readable"),
                ToolCallRequest::new("ReadFile", params(json!({"path": path, "max_bytes": 1024}))),
            ),
            PlanStep::command(
                format!("Copy {path} to {backup}"),
                format!("cp -p {} {}", shell_quote(path), shell_quote(&backup)),
            ),
            PlanStep::tool(
                format!("List {parent} to verify the backup"),
                ToolCallRequest::new("ListDirectory", params(json!({"path": parent}))),
            ),
        ],
        confidence,
    )
}

/// Tidy: list the folder → delete week-old `*.tmp` files in it.
fn build_tidy_template(path: &str, confidence: f64) -> Plan {
    Plan::new(
        format!("Remove stale temporary files from {path}"),
        vec![
            PlanStep::tool(
                format!("List {path} to see what will be affected"),
                ToolCallRequest::new("ListDirectory", params(json!({"path": path}))),
            ),
            PlanStep::command(
                format!("Delete *.tmp files older than 7 days in {path}"),
                format!(
                    "find {} -maxdepth 1 -type f -name '*.tmp' -mtime +7 -print -delete",
                    shell_quote(path)
                ),
            ),
        ],
        confidence,
    )
}

/// Health report: host stats → folder listing.
fn build_health_template(path: &str, confidence: f64) -> Plan {
    Plan::new(
        "System health report",
        vec![
            PlanStep::tool(
                "Collect CPU, memory, and process statistics",
                ToolCallRequest::new("Stat", Map::new()),
            ),
            PlanStep::tool(
                format!("List {path} for an overview of its contents"),
                ToolCallRequest::new("ListDirectory", params(json!({"path": path}))),
            ),
        ],
        confidence,
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────
