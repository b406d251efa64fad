//! REPL sentinel commands and their renderings.
//!
//! Anything that is not a sentinel is a query for the session.

use crate::agent_core::database::AuditCounts;
use crate::agent_core::Session;
use crate::monitor::MonitorSample;
use crate::tools::ToolRegistry;

// ─── Parsing ────────────────────────────────────────────────────────────────

/// One line of operator input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// `/exit`, `exit`, `quit`
    Exit,
    /// `/clear`
    Clear,
    /// `/stats`
    Stats,
    /// `/tools`
    Tools,
    /// `/help`
    Help,
    /// Blank line.
    Empty,
    /// A `/word` that is not a known sentinel.
    Unknown(String),
    /// Free text for the model.
    Query(String),
}

/// Classify a line of input.
pub fn parse_input(line: &str) -> SessionCommand {
    let trimmed = line.trim();
    match trimmed {
        "" => SessionCommand::Empty,
        "/exit" | "exit" | "quit" | "/quit" => SessionCommand::Exit,
        "/clear" => SessionCommand::Clear,
        "/stats" => SessionCommand::Stats,
        "/tools" => SessionCommand::Tools,
        "/help" => SessionCommand::Help,
        cmd if cmd.starts_with('/') && !cmd.contains(char::is_whitespace) && !cmd[1..].contains('/') => {
            SessionCommand::Unknown(cmd.to_string())
        }
        query => SessionCommand::Query(query.to_string()),
    }
}

pub const HELP_TEXT: &str = "\
Commands:
  /tools   list the available tools
  /stats   show session statistics
  /clear   forget the conversation (keeps the system prompt)
  /exit    leave (also: exit, quit)
Anything else is sent to the assistant. Ctrl-C cancels the current request.";

// ─── Rendering ──────────────────────────────────────────────────────────────

/// `/stats` output.
pub fn render_stats(
    session: Option<&Session>,
    audit: Option<&AuditCounts>,
    monitor: Option<&MonitorSample>,
) -> String {
    let mut out = String::from("Session statistics\n");
    match session {
        Some(session) => {
            let stats = session.stats();
            out.push_str(&format!("  session id:         {}\n", session.id()));
            out.push_str(&format!("  requests:           {}\n", stats.requests));
            out.push_str(&format!("  model calls:        {}\n", stats.model_calls));
            out.push_str(&format!(
                "  tool calls:         {} ({} failed)\n",
                stats.tool_calls, stats.failed_tool_calls
            ));
            out.push_str(&format!(
                "  plans:              {} completed, {} halted, {} cancelled\n",
                stats.plans_completed, stats.plans_halted, stats.plans_cancelled
            ));
            out.push_str(&format!(
                "  budget exhausted:   {}\n  cancelled:          {}\n  transport errors:   {}\n",
                stats.budget_exhausted, stats.cancelled, stats.transport_errors
            ));
            out.push_str(&format!(
                "  turns held:         {} / {}\n  estimated tokens:   {}\n",
                session.conversation().len(),
                session.conversation().max_turns(),
                session.estimated_tokens()
            ));
        }
        None => out.push_str("  no session yet\n"),
    }

    if let Some(counts) = audit {
        out.push_str(&format!(
            "  audit log:          {} dispatches, {} ok, {} failed ({} timed out, {} unknown tool)\n",
            counts.total, counts.success, counts.failed, counts.timed_out, counts.unknown_tool
        ));
    }
    if let Some(sample) = monitor {
        out.push_str(&format!("  host:               {}\n", sample.describe()));
    }
    out
}

/// `/tools` output.
pub fn render_tools(registry: &ToolRegistry) -> String {
    if registry.is_empty() {
        return "No tools are available.".to_string();
    }
    let mut out = format!("{} tools:\n", registry.len());
    for name in registry.names() {
        if let Some(tool) = registry.get(&name) {
            out.push_str(&format!("  {name:<14} {}\n", tool.description()));
        }
    }
    out
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_recognized() {
        assert_eq!(parse_input("/exit"), SessionCommand::Exit);
        assert_eq!(parse_input("  exit "), SessionCommand::Exit);
        assert_eq!(parse_input("quit"), SessionCommand::Exit);
        assert_eq!(parse_input("/clear"), SessionCommand::Clear);
        assert_eq!(parse_input("/stats"), SessionCommand::Stats);
        assert_eq!(parse_input("/tools"), SessionCommand::Tools);
        assert_eq!(parse_input("/help"), SessionCommand::Help);
        assert_eq!(parse_input("   "), SessionCommand::Empty);
    }

    #[test]
    fn unknown_slash_word() {
        assert_eq!(parse_input("/frobnicate"), SessionCommand::Unknown("/frobnicate".into()));
    }

    #[test]
    fn paths_and_text_are_queries() {
        assert_eq!(
            parse_input("/etc/hosts has what?"),
            SessionCommand::Query("/etc/hosts has what?".into())
        );
        assert_eq!(parse_input("/etc/hosts"), SessionCommand::Query("/etc/hosts".into()));
        assert_eq!(parse_input("Exit strategy?"), SessionCommand::Query("Exit strategy?".into()));
    }

    #[test]
    fn stats_without_session() {
        let text = render_stats(None, None, None);
        assert!(text.contains("no session yet"));
    }

    #[test]
    fn stats_with_audit_counts() {
        let counts = AuditCounts {
            total: 3,
            success: 2,
            failed: 1,
            timed_out: 0,
            unknown_tool: 1,
        };
        let text = render_stats(None, Some(&counts), None);
        assert!(text.contains("3 dispatches, 2 ok, 1 failed (0 timed out, 1 unknown tool)"));
    }

    #[test]
    fn tools_empty_registry() {
        assert_eq!(render_tools(&ToolRegistry::new()), "No tools are available.");
    }
}
