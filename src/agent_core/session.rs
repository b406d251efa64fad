//! Session: one operator's conversation and its in-flight plan.
//!
//! A session owns exactly one `Conversation` and at most one `Plan` being
//! executed. Input is routed either to the plan gate (when a template
//! matches) or to the orchestrator loop. Sessions share only the
//! read-only tool registry, reached through the orchestrator's dispatcher.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::conversation::Conversation;
use super::orchestrator::{LoopOutcome, Orchestrator, OutcomeKind};
use super::plan_gate::{ConfirmationChannel, DispatchStepRunner, PlanGate, PlanOutcome, PlanReport};
use super::plan_templates::try_template_match;
use super::tokens::estimate_conversation_tokens;
use super::types::{Plan, Turn};
use crate::config::PlanningConfig;
use crate::inference::errors::InferenceError;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Running counters shown by `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub requests: u64,
    pub model_calls: u64,
    pub tool_calls: u64,
    pub failed_tool_calls: u64,
    pub budget_exhausted: u64,
    pub cancelled: u64,
    pub transport_errors: u64,
    pub plans_completed: u64,
    pub plans_halted: u64,
    pub plans_cancelled: u64,
}

/// What one piece of input produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The model loop ran.
    Answer(LoopOutcome),
    /// A template plan went through the plan gate.
    Plan(PlanReport),
}

impl Reply {
    /// Text to show the operator.
    pub fn text(&self) -> String {
        match self {
            Reply::Answer(outcome) => outcome.answer.clone(),
            Reply::Plan(report) => report.summary(),
        }
    }
}

// ─── Session ────────────────────────────────────────────────────────────────

pub struct Session {
    id: String,
    conversation: Conversation,
    plan: Option<Plan>,
    orchestrator: Arc<Orchestrator>,
    gate: PlanGate,
    planning_enabled: bool,
    stats: SessionStats,
}

impl Session {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        system_prompt: impl Into<String>,
        max_turns: usize,
        planning: &PlanningConfig,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %id, max_turns, "session created");
        Self {
            id,
            conversation: Conversation::new(system_prompt, max_turns),
            plan: None,
            orchestrator,
            gate: PlanGate::new(planning.require_confirmation, planning.continue_on_failure),
            planning_enabled: planning.enabled,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The plan currently executing, if any.
    pub fn in_flight_plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Estimated tokens held in the conversation.
    pub fn estimated_tokens(&self) -> u32 {
        estimate_conversation_tokens(self.conversation.turns())
    }

    /// Drop all turns except the system prompt. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.conversation.clear();
        tracing::info!(session_id = %self.id, removed, "conversation cleared");
        removed
    }

    /// Handle one piece of operator input.
    ///
    /// Transport faults come back as `Err`; the session stays usable.
    pub async fn handle_input(
        &mut self,
        input: &str,
        channel: &dyn ConfirmationChannel,
        cancel: &CancellationToken,
    ) -> Result<Reply, InferenceError> {
        self.stats.requests += 1;

        if self.planning_enabled {
            if let Some(plan) = try_template_match(input) {
                return Ok(Reply::Plan(self.run_plan(input, plan, channel, cancel).await));
            }
        }

        self.conversation.append(Turn::user(input));
        match self
            .orchestrator
            .run(&mut self.conversation, &self.id, cancel)
            .await
        {
            Ok(outcome) => {
                self.stats.model_calls += u64::from(outcome.iterations);
                self.stats.tool_calls += outcome.tool_calls.len() as u64;
                self.stats.failed_tool_calls += u64::from(outcome.failed_tool_calls);
                match outcome.kind {
                    OutcomeKind::FinalAnswer => {}
                    OutcomeKind::MaxIterationsReached => self.stats.budget_exhausted += 1,
                    OutcomeKind::Cancelled => self.stats.cancelled += 1,
                }
                Ok(Reply::Answer(outcome))
            }
            Err(e) => {
                self.stats.transport_errors += 1;
                Err(e)
            }
        }
    }

    async fn run_plan(
        &mut self,
        input: &str,
        plan: Plan,
        channel: &dyn ConfirmationChannel,
        cancel: &CancellationToken,
    ) -> PlanReport {
        let runner = DispatchStepRunner::new(self.orchestrator.dispatcher().clone(), self.id.clone());
        let plan = self.plan.insert(plan);
        let report = self.gate.run(plan, &runner, channel, cancel).await;
        self.plan = None;

        self.stats.tool_calls += report.step_results.len() as u64;
        self.stats.failed_tool_calls += report.failed_steps().count() as u64;
        match report.outcome {
            PlanOutcome::Completed => self.stats.plans_completed += 1,
            PlanOutcome::HaltedOnFailure => self.stats.plans_halted += 1,
            PlanOutcome::Cancelled => self.stats.plans_cancelled += 1,
        }

        // Keep the exchange in context so follow-up questions can refer to it.
        self.conversation.append(Turn::user(input));
        self.conversation.append(Turn::assistant(report.summary()));
        self.conversation.enforce_retention();
        report
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use crate::agent_core::tool_router::{ToolDispatcher, DEFAULT_TOOL_TIMEOUT};
    use crate::agent_core::types::ToolResult;
    use crate::inference::client::ChatBackend;
    use crate::tools::{Tool, ToolError, ToolRegistry};

    struct Replies(Mutex<Vec<Result<String, InferenceError>>>);

    #[async_trait]
    impl ChatBackend for Replies {
        async fn chat(&self, _messages: &[Turn]) -> Result<String, InferenceError> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                Ok("done".into())
            } else {
                replies.remove(0)
            }
        }
    }

    struct Answer(bool);

    #[async_trait]
    impl ConfirmationChannel for Answer {
        fn notify(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
        async fn confirm(&self, _prompt: &str) -> bool {
            self.0
        }
    }

    struct Named {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn params_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::ok(json!({"tool": self.name})))
        }
    }

    fn session(
        replies: Vec<Result<String, InferenceError>>,
        planning: PlanningConfig,
    ) -> (Session, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        for name in ["Stat", "ListDirectory"] {
            registry
                .register(Arc::new(Named { name, calls: calls.clone() }))
                .unwrap();
        }
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(registry), DEFAULT_TOOL_TIMEOUT));
        let orch = Arc::new(Orchestrator::new(
            Arc::new(Replies(Mutex::new(replies))),
            dispatcher,
            10,
        ));
        (Session::new(orch, "sys", 40, &planning), calls)
    }

    #[tokio::test]
    async fn test_plain_request_goes_to_model() {
        let (mut s, calls) = session(
            vec![
                Ok(r#"{"tool_to_use":"Stat","parameters":{}}"#.into()),
                Ok("All good.".into()),
            ],
            PlanningConfig::default(),
        );
        let reply = s
            .handle_input("how is it going?", &Answer(false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.text(), "All good.");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.stats().model_calls, 2);
        assert_eq!(s.stats().tool_calls, 1);
        assert_eq!(s.conversation().len(), 5);
    }

    #[tokio::test]
    async fn test_template_request_goes_through_gate() {
        let (mut s, calls) = session(vec![], PlanningConfig::default());
        let reply = s
            .handle_input("give me a health report on memory for this machine", &Answer(true), &CancellationToken::new())
            .await
            .unwrap();
        let Reply::Plan(report) = reply else {
            panic!("expected a plan reply");
        };
        assert_eq!(report.outcome, PlanOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(s.stats().plans_completed, 1);
        assert_eq!(s.stats().model_calls, 0);
        assert!(s.in_flight_plan().is_none());
        assert_eq!(s.conversation().len(), 3);
    }

    #[tokio::test]
    async fn test_declined_plan_runs_nothing() {
        let (mut s, calls) = session(vec![], PlanningConfig::default());
        let reply = s
            .handle_input("give me a health report on memory for this machine", &Answer(false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.text(), "Plan cancelled; no steps were run.");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.stats().plans_cancelled, 1);
    }

    #[tokio::test]
    async fn test_planning_disabled_uses_model() {
        let planning = PlanningConfig {
            enabled: false,
            ..PlanningConfig::default()
        };
        let (mut s, _) = session(vec![Ok("Looks healthy.".into())], planning);
        let reply = s
            .handle_input("give me a health report on memory for this machine", &Answer(true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Answer(_)));
    }

    #[tokio::test]
    async fn test_transport_error_keeps_session_usable() {
        let (mut s, _) = session(
            vec![
                Err(InferenceError::ConnectionFailed {
                    endpoint: "http://localhost:1".into(),
                    reason: "refused".into(),
                }),
                Ok("back online".into()),
            ],
            PlanningConfig::default(),
        );
        let cancel = CancellationToken::new();
        assert!(s.handle_input("hi", &Answer(false), &cancel).await.is_err());
        assert_eq!(s.stats().transport_errors, 1);

        let reply = s.handle_input("hi again", &Answer(false), &cancel).await.unwrap();
        assert_eq!(reply.text(), "back online");
    }

    #[tokio::test]
    async fn test_clear_keeps_system_prompt() {
        let (mut s, _) = session(vec![Ok("hello".into())], PlanningConfig::default());
        s.handle_input("hi", &Answer(false), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(s.clear(), 2);
        assert_eq!(s.conversation().turns(), &[Turn::system("sys")]);
        assert!(s.estimated_tokens() > 0);
    }
}
