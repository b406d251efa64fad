//! Plan gate: confirmation and ordered execution of multi-step plans.
//!
//! ```text
//! Proposed ──(confirmed or waived)──▶ Executing ──▶ Completed
//!    │                                   ├───────▶ HaltedOnFailure
//!    └──(declined)──▶ Cancelled          └───────▶ Cancelled
//! ```
//!
//! A plan with more than one step needs an explicit affirmative unless
//! confirmation is waived. A low-confidence plan always shows its warning
//! before any prompt and always asks, waived or not.
//!
//! There is no rollback: when a plan halts, the side effects of completed
//! steps stay in place and the report lists them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;

use super::tool_router::ToolDispatcher;
use super::types::{Plan, PlanAction, PlanStep, ToolCallRequest, ToolResult};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Plans below this confidence always warn and always ask.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Tool that executes `Command` steps.
pub const COMMAND_TOOL: &str = "RunScript";

// ─── Seams ──────────────────────────────────────────────────────────────────

/// Yes/no channel to the operator.
#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    /// Show informational text.
    fn notify(&self, message: &str);

    /// Show a warning.
    fn warn(&self, message: &str);

    /// Ask a yes/no question. Anything but an explicit yes is `false`.
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Executes one plan step.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step: &PlanStep, cancel: &CancellationToken) -> ToolResult;
}

/// Whether an operator response counts as "yes".
pub fn is_affirmative(response: &str) -> bool {
    matches!(response.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// The tool call a step performs. `Command` steps go through `RunScript`.
pub fn step_request(step: &PlanStep) -> ToolCallRequest {
    match &step.action {
        PlanAction::Tool(request) => request.clone(),
        PlanAction::Command { command } => {
            let mut params = Map::new();
            params.insert("command".into(), json!(command));
            ToolCallRequest::new(COMMAND_TOOL, params)
        }
    }
}

/// Runs steps through the session's dispatcher.
pub struct DispatchStepRunner {
    dispatcher: Arc<ToolDispatcher>,
    session_id: String,
}

impl DispatchStepRunner {
    pub fn new(dispatcher: Arc<ToolDispatcher>, session_id: impl Into<String>) -> Self {
        Self {
            dispatcher,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl StepRunner for DispatchStepRunner {
    async fn run_step(&self, step: &PlanStep, cancel: &CancellationToken) -> ToolResult {
        self.dispatcher
            .dispatch(&step_request(step), &self.session_id, cancel)
            .await
    }
}

// ─── Report ─────────────────────────────────────────────────────────────────

/// Terminal state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    Completed,
    HaltedOnFailure,
    Cancelled,
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// 1-based position in the plan.
    pub index: usize,
    pub description: String,
    pub result: ToolResult,
}

/// What happened to a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanReport {
    pub outcome: PlanOutcome,
    pub step_results: Vec<StepOutcome>,
    pub warnings: Vec<String>,
    pub total_steps: usize,
}

impl PlanReport {
    /// Steps that ran and succeeded. Their side effects are not undone.
    pub fn completed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.step_results.iter().filter(|s| s.result.success())
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.step_results.iter().filter(|s| !s.result.success())
    }

    /// Operator-facing summary.
    pub fn summary(&self) -> String {
        let completed = self.completed_steps().count();
        let mut out = match self.outcome {
            PlanOutcome::Completed => format!(
                "Plan completed: {completed}/{} steps succeeded.",
                self.total_steps
            ),
            PlanOutcome::HaltedOnFailure => format!(
                "Plan halted on failure after {} of {} steps.",
                self.step_results.len(),
                self.total_steps
            ),
            PlanOutcome::Cancelled if self.step_results.is_empty() => {
                "Plan cancelled; no steps were run.".to_string()
            }
            PlanOutcome::Cancelled => format!(
                "Plan cancelled after {} of {} steps.",
                self.step_results.len(),
                self.total_steps
            ),
        };

        for step in &self.step_results {
            match step.result.error() {
                None => out.push_str(&format!("\n  ✓ {}. {}", step.index, step.description)),
                Some(err) => out.push_str(&format!(
                    "\n  ✗ {}. {}: {err}",
                    step.index, step.description
                )),
            }
        }

        if self.outcome != PlanOutcome::Completed && completed > 0 {
            out.push_str(&format!(
                "\n{completed} completed step{} left in place (no rollback).",
                if completed == 1 { "" } else { "s" }
            ));
        }
        out
    }
}

// ─── PlanGate ───────────────────────────────────────────────────────────────

/// Confirmation policy plus ordered execution.
#[derive(Debug, Clone, Copy)]
pub struct PlanGate {
    pub require_confirmation: bool,
    pub continue_on_failure: bool,
}

impl PlanGate {
    pub fn new(require_confirmation: bool, continue_on_failure: bool) -> Self {
        Self {
            require_confirmation,
            continue_on_failure,
        }
    }

    /// Whether this plan blocks on the operator before running.
    pub fn needs_confirmation(&self, plan: &Plan) -> bool {
        (plan.steps().len() > 1 && self.require_confirmation)
            || plan.confidence() < LOW_CONFIDENCE_THRESHOLD
    }

    /// Present, confirm, and execute `plan`.
    pub async fn run(
        &self,
        plan: &Plan,
        runner: &dyn StepRunner,
        channel: &dyn ConfirmationChannel,
        cancel: &CancellationToken,
    ) -> PlanReport {
        let mut report = PlanReport {
            outcome: PlanOutcome::Cancelled,
            step_results: Vec::new(),
            warnings: Vec::new(),
            total_steps: plan.steps().len(),
        };

        // ── Proposed ────────────────────────────────────────────────────
        channel.notify(&plan.render());

        if plan.confidence() < LOW_CONFIDENCE_THRESHOLD {
            let warning = format!(
                "Low confidence plan ({:.0}%): the request may have been misread. \
                 Review every step before approving.",
                plan.confidence() * 100.0
            );
            channel.warn(&warning);
            report.warnings.push(warning);
        }

        if self.needs_confirmation(plan) {
            let prompt = format!("Run {} step(s)? [y/N]", plan.steps().len());
            let approved = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                answer = channel.confirm(&prompt) => answer,
            };
            if !approved {
                tracing::info!(steps = plan.steps().len(), "plan declined");
                return report;
            }
        }

        // ── Executing ───────────────────────────────────────────────────
        tracing::info!(
            summary = plan.summary(),
            steps = plan.steps().len(),
            confidence = plan.confidence(),
            "executing plan"
        );

        for (i, step) in plan.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                return report;
            }

            let result = runner.run_step(step, cancel).await;
            let failed = !result.success();
            tracing::info!(
                step = i + 1,
                success = !failed,
                description = %step.description,
                "plan step finished"
            );
            report.step_results.push(StepOutcome {
                index: i + 1,
                description: step.description.clone(),
                result,
            });

            if cancel.is_cancelled() {
                return report;
            }
            if failed && !self.continue_on_failure {
                report.outcome = PlanOutcome::HaltedOnFailure;
                tracing::warn!(step = i + 1, "plan halted on failed step");
                return report;
            }
        }

        report.outcome = PlanOutcome::Completed;
        report
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    struct ScriptedConfirmer {
        answers: Mutex<VecDeque<bool>>,
        events: Mutex<Vec<String>>,
    }

    impl ScriptedConfirmer {
        fn new(answers: &[bool]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn kinds(&self) -> Vec<String> {
            self.events()
                .iter()
                .map(|e| e.split(':').next().unwrap().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl ConfirmationChannel for ScriptedConfirmer {
        fn notify(&self, message: &str) {
            self.events.lock().unwrap().push(format!("notify:{message}"));
        }
        fn warn(&self, message: &str) {
            self.events.lock().unwrap().push(format!("warn:{message}"));
        }
        async fn confirm(&self, prompt: &str) -> bool {
            self.events.lock().unwrap().push(format!("confirm:{prompt}"));
            self.answers.lock().unwrap().pop_front().unwrap_or(false)
        }
    }

    /// Fails the steps whose 1-based index is in `fail`.
    struct FakeRunner {
        fail: HashSet<usize>,
        ran: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(fail: &[usize]) -> Self {
            Self {
                fail: fail.iter().copied().collect(),
                ran: Mutex::new(Vec::new()),
            }
        }

        fn ran(&self) -> Vec<String> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepRunner for FakeRunner {
        async fn run_step(&self, step: &PlanStep, _cancel: &CancellationToken) -> ToolResult {
            let mut ran = self.ran.lock().unwrap();
            ran.push(step.description.clone());
            if self.fail.contains(&ran.len()) {
                ToolResult::failure("boom", None)
            } else {
                ToolResult::ok(json!(null))
            }
        }
    }

    fn plan(steps: usize, confidence: f64) -> Plan {
        let steps = (1..=steps)
            .map(|i| PlanStep::command(format!("step {i}"), format!("echo {i}")))
            .collect();
        Plan::new("test plan", steps, confidence)
    }

    #[tokio::test]
    async fn test_low_confidence_warns_before_prompt_even_when_waived() {
        let gate = PlanGate::new(false, false);
        let channel = ScriptedConfirmer::new(&[true]);
        let runner = FakeRunner::new(&[]);

        let report = gate
            .run(&plan(3, 0.4), &runner, &channel, &CancellationToken::new())
            .await;

        assert_eq!(channel.kinds(), vec!["notify", "warn", "confirm"]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("40%"));
        assert_eq!(report.outcome, PlanOutcome::Completed);
        assert_eq!(runner.ran().len(), 3);
    }

    #[tokio::test]
    async fn test_low_confidence_decline_runs_nothing() {
        let gate = PlanGate::new(false, false);
        let channel = ScriptedConfirmer::new(&[false]);
        let runner = FakeRunner::new(&[]);

        let report = gate
            .run(&plan(1, 0.2), &runner, &channel, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, PlanOutcome::Cancelled);
        assert!(runner.ran().is_empty());
    }

    #[tokio::test]
    async fn test_multi_step_requires_confirmation() {
        let gate = PlanGate::new(true, false);
        let channel = ScriptedConfirmer::new(&[false]);
        let runner = FakeRunner::new(&[]);

        let report = gate
            .run(&plan(2, 0.9), &runner, &channel, &CancellationToken::new())
            .await;

        assert_eq!(channel.kinds(), vec!["notify", "confirm"]);
        assert_eq!(report.outcome, PlanOutcome::Cancelled);
        assert!(runner.ran().is_empty());
        assert_eq!(report.summary(), "Plan cancelled; no steps were run.");
    }

    #[tokio::test]
    async fn test_waived_confident_plan_runs_without_prompt() {
        let gate = PlanGate::new(false, false);
        let channel = ScriptedConfirmer::new(&[]);
        let runner = FakeRunner::new(&[]);

        let report = gate
            .run(&plan(3, 0.8), &runner, &channel, &CancellationToken::new())
            .await;

        assert_eq!(channel.kinds(), vec!["notify"]);
        assert_eq!(report.outcome, PlanOutcome::Completed);
    }

    #[tokio::test]
    async fn test_single_confident_step_needs_no_prompt() {
        let gate = PlanGate::new(true, false);
        assert!(!gate.needs_confirmation(&plan(1, 0.9)));
        assert!(gate.needs_confirmation(&plan(2, 0.9)));
        assert!(gate.needs_confirmation(&plan(1, 0.49)));
    }

    #[tokio::test]
    async fn test_halts_on_first_failure() {
        let gate = PlanGate::new(true, false);
        let channel = ScriptedConfirmer::new(&[true]);
        let runner = FakeRunner::new(&[2]);

        let report = gate
            .run(&plan(3, 0.9), &runner, &channel, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, PlanOutcome::HaltedOnFailure);
        assert_eq!(runner.ran(), vec!["step 1", "step 2"]);
        assert_eq!(report.completed_steps().count(), 1);
        let summary = report.summary();
        assert!(summary.starts_with("Plan halted on failure after 2 of 3 steps."));
        assert!(summary.contains("✗ 2. step 2: boom"));
        assert!(summary.contains("1 completed step left in place (no rollback)."));
    }

    #[tokio::test]
    async fn test_continue_on_failure_records_and_proceeds() {
        let gate = PlanGate::new(true, true);
        let channel = ScriptedConfirmer::new(&[true]);
        let runner = FakeRunner::new(&[1]);

        let report = gate
            .run(&plan(3, 0.9), &runner, &channel, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, PlanOutcome::Completed);
        assert_eq!(runner.ran().len(), 3);
        assert_eq!(report.failed_steps().count(), 1);
        assert!(report.summary().starts_with("Plan completed: 2/3 steps succeeded."));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_steps() {
        let gate = PlanGate::new(false, false);
        let channel = ScriptedConfirmer::new(&[]);
        let runner = FakeRunner::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = gate.run(&plan(2, 0.9), &runner, &channel, &cancel).await;
        assert_eq!(report.outcome, PlanOutcome::Cancelled);
        assert!(runner.ran().is_empty());
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative(" YES \n"));
        assert!(!is_affirmative("yeah"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative("sure"));
    }

    #[test]
    fn test_command_step_goes_through_run_script() {
        let req = step_request(&PlanStep::command("clean", "rm -f /tmp/x.tmp"));
        assert_eq!(req.tool_name, COMMAND_TOOL);
        assert_eq!(req.parameters["command"], "rm -f /tmp/x.tmp");

        let tool = ToolCallRequest::new("Stat", Map::new());
        assert_eq!(step_request(&PlanStep::tool("stats", tool.clone())), tool);
    }
}
