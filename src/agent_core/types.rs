//! Shared types for the agent core.
//!
//! Conversation turns, tool call requests, the uniform tool result envelope,
//! plans, and audit records used across the Conversation, ToolDispatcher,
//! PlanGate, and Orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Conversation Turns ─────────────────────────────────────────────────────

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    /// Serialized `ToolResult` fed back to the model.
    ToolResult,
}

impl TurnRole {
    /// Lowercase label used in logs and `/stats`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::ToolResult => "tool_result",
        }
    }
}

/// A single message in the conversation log.
///
/// Turns are never edited after being appended; the `Conversation` only
/// hands out shared references and clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: TurnRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into() }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self { role: TurnRole::ToolResult, content: content.into() }
    }
}

// ─── Tool Calls ─────────────────────────────────────────────────────────────

/// A tool invocation extracted from model text.
///
/// On the wire the name travels as `tool_to_use`:
/// `{"tool_to_use": "Stat", "parameters": {}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(rename = "tool_to_use")]
    pub tool_name: String,
    pub parameters: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }

    /// Parameters as a JSON value (for audit rows and previews).
    pub fn parameters_value(&self) -> Value {
        Value::Object(self.parameters.clone())
    }
}

/// Uniform success/failure envelope produced by every tool call.
///
/// Only constructible through [`ToolResult::ok`] and [`ToolResult::failure`],
/// so `data` is present iff `success` and `error` is present iff `!success`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<String>,
}

impl ToolResult {
    /// Successful result carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_details: None,
        }
    }

    /// Failed result with a short error and optional diagnostic detail.
    pub fn failure(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            error_details: details,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_details(&self) -> Option<&str> {
        self.error_details.as_deref()
    }

    /// Serialize to the JSON text stored in a `ToolResult` turn.
    pub fn to_turn_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"result not serializable: {e}"}}"#)
        })
    }
}

// ─── Plans ──────────────────────────────────────────────────────────────────

/// What a plan step does when executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanAction {
    /// Invoke a registered tool.
    Tool(ToolCallRequest),
    /// Run a shell command (dispatched through the `RunScript` tool).
    Command { command: String },
}

/// A single step in a multi-step plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub description: String,
    pub action: PlanAction,
}

impl PlanStep {
    pub fn tool(description: impl Into<String>, request: ToolCallRequest) -> Self {
        Self {
            description: description.into(),
            action: PlanAction::Tool(request),
        }
    }

    pub fn command(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: PlanAction::Command {
                command: command.into(),
            },
        }
    }
}

/// An ordered list of steps proposed for one user request.
///
/// Built once and never mutated; there is no `&mut` API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    summary: String,
    steps: Vec<PlanStep>,
    confidence: f64,
}

impl Plan {
    /// Build a plan. `confidence` is clamped into `[0, 1]`; NaN becomes 0.
    pub fn new(summary: impl Into<String>, steps: Vec<PlanStep>, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            summary: summary.into(),
            steps,
            confidence,
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Human-readable rendering shown to the operator before confirmation.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Plan: {} ({} step{}, confidence {:.0}%)",
            self.summary,
            self.steps.len(),
            if self.steps.len() == 1 { "" } else { "s" },
            self.confidence * 100.0
        );
        for (i, step) in self.steps.iter().enumerate() {
            let action = match &step.action {
                PlanAction::Tool(req) => format!("tool {}", req.tool_name),
                PlanAction::Command { command } => format!("run `{command}`"),
            };
            out.push_str(&format!("\n  {}. {} [{}]", i + 1, step.description, action));
        }
        out
    }
}

// ─── Audit Log ──────────────────────────────────────────────────────────────

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Auto-incremented row ID.
    pub id: i64,
    /// Session in which the tool was dispatched.
    pub session_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
    /// Requested tool name (as the model spelled it).
    pub tool_name: String,
    /// Parameters passed to the tool.
    pub arguments: serde_json::Value,
    /// Error text, when the dispatch failed.
    pub error: Option<String>,
    /// Outcome of the dispatch.
    pub result_status: AuditStatus,
    /// How long the dispatch took (ms).
    pub execution_time_ms: u64,
}

/// Outcome of a tool dispatch in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Tool returned a successful envelope.
    Success,
    /// Tool returned a failure envelope or an error.
    Error,
    /// Name not present in the registry; nothing executed.
    UnknownTool,
    /// Parameters failed schema validation; nothing executed.
    InvalidParameters,
    /// Tool exceeded its time budget and was cancelled.
    TimedOut,
    /// Operator cancelled the request while the tool was running.
    Cancelled,
    /// Tool panicked; the panic was captured.
    Panicked,
}

impl AuditStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
            AuditStatus::UnknownTool => "unknown_tool",
            AuditStatus::InvalidParameters => "invalid_parameters",
            AuditStatus::TimedOut => "timed_out",
            AuditStatus::Cancelled => "cancelled",
            AuditStatus::Panicked => "panicked",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => AuditStatus::Success,
            "unknown_tool" => AuditStatus::UnknownTool,
            "invalid_parameters" => AuditStatus::InvalidParameters,
            "timed_out" => AuditStatus::TimedOut,
            "cancelled" => AuditStatus::Cancelled,
            "panicked" => AuditStatus::Panicked,
            _ => AuditStatus::Error,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
