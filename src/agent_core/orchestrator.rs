//! Orchestrator loop: model reply → tool call → tool result → model, bounded.
//!
//! One user request runs as a small state machine over the session's
//! `Conversation`:
//!
//! ```text
//! AwaitingModel ──(tool call)──▶ HasToolCall ──▶ ExecutingTool ──┐
//!      ▲                                                         │
//!      └─────────────────────────────────────────────────────────┘
//! AwaitingModel ──(plain text)──▶ FinalAnswer
//! AwaitingModel ──(bound hit)───▶ MaxIterationsReached
//! any non-terminal ──(cancel)───▶ Cancelled
//! ```
//!
//! Every entry into `AwaitingModel` costs one iteration. At most one model
//! call or tool dispatch is in flight at a time. Transport faults end the
//! request with `Err` and leave the conversation usable.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::conversation::Conversation;
use super::tokens::truncate_utf8;
use super::tool_router::ToolDispatcher;
use super::types::{ToolCallRequest, Turn};
use crate::inference::client::ChatBackend;
use crate::inference::errors::InferenceError;
use crate::inference::tool_call_parser::extract_tool_call;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default maximum model calls per user request.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Answer returned when the iteration bound is hit without a final answer.
pub const BUDGET_EXHAUSTED_ANSWER: &str =
    "I could not complete this request within the iteration budget.";

/// Answer returned when the operator aborts the request.
pub const CANCELLED_ANSWER: &str = "Request cancelled.";

/// Maximum characters of a serialized tool result kept in the conversation.
pub const MAX_TOOL_RESULT_BYTES: usize = 6_000;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Loop state. Data needed by the next transition travels with the state.
#[derive(Debug, Clone, PartialEq)]
enum LoopState {
    AwaitingModel,
    HasToolCall {
        reply: String,
        request: ToolCallRequest,
    },
    ExecutingTool(ToolCallRequest),
    FinalAnswer(String),
    MaxIterationsReached,
    Cancelled,
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    FinalAnswer,
    MaxIterationsReached,
    Cancelled,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result of one orchestrated request.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub kind: OutcomeKind,
    /// Final model text, or a sentinel for the non-answer outcomes.
    pub answer: String,
    /// Model calls made.
    pub iterations: u32,
    /// Names of the tools dispatched, in order.
    pub tool_calls: Vec<String>,
    /// How many of those dispatches returned a failure envelope.
    pub failed_tool_calls: u32,
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Drives the model/tool loop for one request at a time.
pub struct Orchestrator {
    backend: Arc<dyn ChatBackend>,
    dispatcher: Arc<ToolDispatcher>,
    max_iterations: u32,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        dispatcher: Arc<ToolDispatcher>,
        max_iterations: u32,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            max_iterations,
        }
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run the loop until a final answer, the iteration bound, or cancellation.
    ///
    /// The caller appends the user turn before calling.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, InferenceError> {
        let mut state = LoopState::AwaitingModel;
        let mut iterations = 0u32;
        let mut tool_calls: Vec<String> = Vec::new();
        let mut failed_tool_calls = 0u32;

        loop {
            // A dispatch already decided on still runs so its result turn
            // lands; the dispatcher itself refuses to execute once cancelled.
            if cancel.is_cancelled()
                && matches!(state, LoopState::AwaitingModel | LoopState::HasToolCall { .. })
            {
                state = LoopState::Cancelled;
            }

            state = match state {
                LoopState::AwaitingModel => {
                    if iterations >= self.max_iterations {
                        LoopState::MaxIterationsReached
                    } else {
                        iterations += 1;
                        tracing::debug!(
                            session_id,
                            iteration = iterations,
                            turns = conversation.len(),
                            "calling model"
                        );
                        let snapshot = conversation.snapshot();
                        let reply = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            reply = self.backend.chat(&snapshot) => Some(reply),
                        };
                        match reply {
                            None => LoopState::Cancelled,
                            Some(Err(e)) => {
                                tracing::warn!(
                                    session_id,
                                    iteration = iterations,
                                    error = %e,
                                    "model call failed; request aborted"
                                );
                                return Err(e);
                            }
                            Some(Ok(text)) => match extract_tool_call(&text) {
                                Some(request) => LoopState::HasToolCall {
                                    reply: text,
                                    request,
                                },
                                None => LoopState::FinalAnswer(text),
                            },
                        }
                    }
                }

                LoopState::HasToolCall { reply, request } => {
                    conversation.append(Turn::assistant(reply));
                    LoopState::ExecutingTool(request)
                }

                LoopState::ExecutingTool(request) => {
                    let result = self.dispatcher.dispatch(&request, session_id, cancel).await;
                    if !result.success() {
                        failed_tool_calls += 1;
                    }
                    tool_calls.push(request.tool_name.clone());

                    let content = truncate_tool_result(&result.to_turn_content(), &request.tool_name);
                    conversation.append(Turn::tool_result(content));
                    conversation.enforce_retention();
                    LoopState::AwaitingModel
                }

                LoopState::FinalAnswer(answer) => {
                    conversation.append(Turn::assistant(answer.clone()));
                    conversation.enforce_retention();
                    return Ok(self.finish(
                        session_id,
                        OutcomeKind::FinalAnswer,
                        answer,
                        iterations,
                        tool_calls,
                        failed_tool_calls,
                    ));
                }

                LoopState::MaxIterationsReached => {
                    return Ok(self.finish(
                        session_id,
                        OutcomeKind::MaxIterationsReached,
                        BUDGET_EXHAUSTED_ANSWER.to_string(),
                        iterations,
                        tool_calls,
                        failed_tool_calls,
                    ));
                }

                LoopState::Cancelled => {
                    return Ok(self.finish(
                        session_id,
                        OutcomeKind::Cancelled,
                        CANCELLED_ANSWER.to_string(),
                        iterations,
                        tool_calls,
                        failed_tool_calls,
                    ));
                }
            };
        }
    }

    fn finish(
        &self,
        session_id: &str,
        kind: OutcomeKind,
        answer: String,
        iterations: u32,
        tool_calls: Vec<String>,
        failed_tool_calls: u32,
    ) -> LoopOutcome {
        if kind == OutcomeKind::MaxIterationsReached {
            tracing::warn!(
                session_id,
                max_iterations = self.max_iterations,
                tool_calls = tool_calls.len(),
                "iteration budget exhausted"
            );
        } else {
            tracing::info!(
                session_id,
                outcome = kind.as_str(),
                iterations,
                tool_calls = tool_calls.len(),
                failed_tool_calls,
                "request finished"
            );
        }
        LoopOutcome {
            kind,
            answer,
            iterations,
            tool_calls,
            failed_tool_calls,
        }
    }
}

/// Truncate a serialized tool result if it exceeds `MAX_TOOL_RESULT_BYTES`.
///
/// Keeps the beginning, which usually carries the most useful fields, and
/// appends a truncation notice.
fn truncate_tool_result(result: &str, tool_name: &str) -> String {
    if result.len() <= MAX_TOOL_RESULT_BYTES {
        return result.to_string();
    }

    let truncated = truncate_utf8(result, MAX_TOOL_RESULT_BYTES);
    tracing::warn!(
        tool = %tool_name,
        original_len = result.len(),
        truncated_to = truncated.len(),
        "tool result truncated"
    );
    format!(
        "{truncated}\n\n[... truncated: showing first {} of {} bytes]",
        truncated.len(),
        result.len()
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────
