//! SQLite audit log of tool dispatches.
//!
//! Uses `rusqlite` in synchronous mode behind a `Mutex`; writes are one short
//! INSERT per dispatch, so holding the lock inside async code is fine.
//! WAL mode is enabled so an external reader can follow the log.

use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::errors::AgentError;
use super::types::{AuditEntry, AuditStatus};

// ─── AuditLog ───────────────────────────────────────────────────────────────

/// Per-status dispatch counts for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditCounts {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub unknown_tool: u64,
}

/// SQLite handle for the audit log.
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    /// Open (or create) the audit database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let log = Self {
            conn: Mutex::new(conn),
        };
        log.create_tables()?;
        Ok(log)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|e| AgentError::AuditError {
            reason: format!("audit connection lock poisoned: {e}"),
        })
    }

    /// Create all required tables if they don't exist.
    fn create_tables(&self) -> Result<(), AgentError> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                tool_name TEXT NOT NULL,
                arguments TEXT,
                error TEXT,
                result_status TEXT NOT NULL,
                execution_time_ms INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_audit_session
                ON audit_log(session_id);
            ",
        )?;
        Ok(())
    }

    /// Insert an audit log entry.
    pub fn insert_audit_entry(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        error: Option<&str>,
        status: AuditStatus,
        execution_time_ms: u64,
    ) -> Result<i64, AgentError> {
        let args_json = serde_json::to_string(arguments)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO audit_log
             (session_id, tool_name, arguments, error, result_status, execution_time_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                tool_name,
                args_json,
                error,
                status.as_str(),
                execution_time_ms as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get audit log entries for a session, oldest first.
    pub fn get_audit_entries(&self, session_id: &str) -> Result<Vec<AuditEntry>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, timestamp, tool_name, arguments,
                    error, result_status, execution_time_ms
             FROM audit_log
             WHERE session_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                session_id: row.get(1)?,
                timestamp: row.get(2)?,
                tool_name: row.get(3)?,
                arguments: parse_json_value(row.get::<_, Option<String>>(4)?),
                error: row.get(5)?,
                result_status: AuditStatus::parse(&row.get::<_, String>(6)?),
                execution_time_ms: row.get::<_, i64>(7)? as u64,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Dispatch counts for a session, grouped by outcome.
    pub fn counts(&self, session_id: &str) -> Result<AuditCounts, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT result_status, COUNT(*) FROM audit_log
             WHERE session_id = ?1
             GROUP BY result_status",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = AuditCounts::default();
        for row in rows {
            let (status, n) = row?;
            counts.total += n;
            match AuditStatus::parse(&status) {
                AuditStatus::Success => counts.success += n,
                AuditStatus::TimedOut => {
                    counts.timed_out += n;
                    counts.failed += n;
                }
                AuditStatus::UnknownTool => {
                    counts.unknown_tool += n;
                    counts.failed += n;
                }
                _ => counts.failed += n,
            }
        }
        Ok(counts)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn parse_json_value(json: Option<String>) -> serde_json::Value {
    json.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
