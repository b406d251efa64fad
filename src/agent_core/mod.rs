//! Agent Core: orchestration layer for turnloop.
//!
//! Submodules:
//! - `types`: Shared types (turns, tool calls, results, plans, audit rows)
//! - `conversation`: Ordered turn log with a pair-preserving retention window
//! - `tool_router`: Dispatches one tool call under a time budget
//! - `orchestrator`: The bounded model → tool → model loop
//! - `plan_gate`: Confirmation and ordered execution of multi-step plans
//! - `plan_templates`: Keyword templates that turn requests into plans
//! - `session`: One operator's conversation, plan, and counters
//! - `database`: SQLite audit log of tool dispatches
//! - `tokens`: Token estimation and UTF-8 safe truncation
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod database;
pub mod errors;
pub mod orchestrator;
pub mod plan_gate;
pub mod plan_templates;
pub mod session;
pub mod tokens;
pub mod tool_router;
pub mod types;

// Re-exports for convenience
pub use conversation::Conversation;
pub use database::AuditLog;
pub use errors::AgentError;
pub use orchestrator::{LoopOutcome, Orchestrator, OutcomeKind};
pub use plan_gate::{ConfirmationChannel, PlanGate, PlanOutcome, PlanReport, StepRunner};
pub use session::{Reply, Session, SessionStats};
pub use tool_router::ToolDispatcher;
pub use types::{AuditEntry, AuditStatus, Plan, PlanStep, ToolCallRequest, ToolResult, Turn, TurnRole};
