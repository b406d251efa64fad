//! Conversation: the ordered turn log for one session.
//!
//! Responsibilities:
//! - Append turns in total order (append never drops anything)
//! - Hand out snapshots for the model backend
//! - Enforce the retention window via explicit `trim`, keeping the leading
//!   system turn and never separating an assistant turn from the tool result
//!   that follows it
//!
//! Nothing here is persisted; a conversation lives as long as its session.

use super::types::{Turn, TurnRole};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default retention window (turns, system turn included).
pub const DEFAULT_MAX_TURNS: usize = 40;

// ─── Conversation ───────────────────────────────────────────────────────────

/// Ordered, append-only turn log with a bounded retention window.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl Conversation {
    /// Start a conversation whose first turn is `system_prompt`.
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            turns: vec![Turn::system(system_prompt)],
            max_turns,
        }
    }

    /// Append a turn. Total: never rejects or drops.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Owned copy of the turns, oldest first.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Borrowed view of the turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Configured retention window.
    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// The most recent turn, if any.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Trim to the configured retention window.
    pub fn enforce_retention(&mut self) -> usize {
        self.trim(self.max_turns)
    }

    /// Remove the oldest non-system turns until at most `max_turns` remain.
    ///
    /// The system turn at index 0 always survives (a `max_turns` below 1 is
    /// treated as 1). If the oldest surviving turn would be a tool result
    /// whose assistant turn was removed, it is removed too, so the result may
    /// hold fewer than `max_turns` turns. Returns the number removed.
    pub fn trim(&mut self, max_turns: usize) -> usize {
        let max_turns = max_turns.max(1);
        if self.turns.len() <= max_turns {
            return 0;
        }

        let protected = usize::from(
            self.turns
                .first()
                .is_some_and(|t| t.role == TurnRole::System),
        );
        let mut remove = self.turns.len() - max_turns;
        while protected + remove < self.turns.len()
            && self.turns[protected + remove].role == TurnRole::ToolResult
        {
            remove += 1;
        }

        self.turns.drain(protected..protected + remove);
        tracing::debug!(removed = remove, remaining = self.turns.len(), "conversation trimmed");
        remove
    }

    /// Drop every turn except the system turn. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let keep = usize::from(
            self.turns
                .first()
                .is_some_and(|t| t.role == TurnRole::System),
        );
        let removed = self.turns.len() - keep;
        self.turns.truncate(keep);
        removed
    }

    /// Whether every tool-result turn directly follows an assistant turn.
    pub fn pairs_intact(&self) -> bool {
        self.turns.iter().enumerate().all(|(i, t)| {
            t.role != TurnRole::ToolResult
                || (i > 0 && self.turns[i - 1].role == TurnRole::Assistant)
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// System + `rounds` × (user, assistant, tool_result).
    fn tool_heavy(rounds: usize) -> Conversation {
        let mut conv = Conversation::new("sys", DEFAULT_MAX_TURNS);
        for i in 0..rounds {
            conv.append(Turn::user(format!("q{i}")));
            conv.append(Turn::assistant(format!("call{i}")));
            conv.append(Turn::tool_result(format!("r{i}")));
        }
        conv
    }

    #[test]
    fn test_append_and_snapshot_preserve_order() {
        let mut conv = Conversation::new("sys", 10);
        conv.append(Turn::user("a"));
        conv.append(Turn::assistant("b"));
        let snap = conv.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0], Turn::system("sys"));
        assert_eq!(snap[1], Turn::user("a"));
        assert_eq!(snap[2], Turn::assistant("b"));
    }

    #[test]
    fn test_trim_noop_under_limit() {
        let mut conv = tool_heavy(2);
        assert_eq!(conv.trim(10), 0);
        assert_eq!(conv.len(), 7);
    }

    #[test]
    fn test_trim_keeps_system_turn() {
        let mut conv = tool_heavy(5);
        conv.trim(4);
        assert_eq!(conv.turns()[0], Turn::system("sys"));
        assert!(conv.len() <= 4);
    }

    #[test]
    fn test_trim_removes_orphaned_tool_result() {
        // sys, u0, a0, r0, u1, a1, r1: removing 3 leaves sys, u1, a1, r1
        let mut conv = tool_heavy(2);
        assert_eq!(conv.trim(4), 3);
        assert_eq!(conv.turns()[1], Turn::user("q1"));

        // Removing 2 would start the window at r0; it goes too.
        let mut conv = tool_heavy(2);
        assert_eq!(conv.trim(5), 3);
        assert_eq!(conv.len(), 4);
        assert!(conv.pairs_intact());
    }

    #[test]
    fn test_trim_never_splits_pairs_for_any_bound() {
        for rounds in 0..6 {
            for max in 0..20 {
                let mut conv = tool_heavy(rounds);
                conv.trim(max);
                assert!(conv.pairs_intact(), "rounds={rounds} max={max}");
                assert_eq!(conv.turns()[0].role, TurnRole::System);
                assert!(conv.len() <= max.max(1));
            }
        }
    }

    #[test]
    fn test_trim_zero_keeps_only_system() {
        let mut conv = tool_heavy(3);
        conv.trim(0);
        assert_eq!(conv.snapshot(), vec![Turn::system("sys")]);
    }

    #[test]
    fn test_enforce_retention_uses_configured_window() {
        let mut conv = Conversation::new("sys", 3);
        for i in 0..5 {
            conv.append(Turn::user(format!("u{i}")));
        }
        assert_eq!(conv.enforce_retention(), 3);
        assert_eq!(conv.turns()[1], Turn::user("u3"));
        assert_eq!(conv.turns()[2], Turn::user("u4"));
    }

    #[test]
    fn test_clear_keeps_system() {
        let mut conv = tool_heavy(2);
        assert_eq!(conv.clear(), 6);
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.last(), Some(&Turn::system("sys")));
    }
}
