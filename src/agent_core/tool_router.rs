//! ToolDispatcher: executes one tool call and normalizes the outcome.
//!
//! The dispatcher is the bridge between an extracted `ToolCallRequest` and the
//! `ToolRegistry`. It handles:
//! - Lookup (exact, case-sensitive; a miss executes nothing)
//! - Validation of required parameters against the tool's schema
//! - Execution on a spawned task under a time budget
//! - Cancellation: the task is aborted, which drops the tool future and with
//!   it any `kill_on_drop` child process
//! - Folding errors, panics, timeouts, and cancellation into `ToolResult`
//! - Audit logging of every dispatch
//!
//! `dispatch` never returns an error and never panics on behalf of a tool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use super::database::AuditLog;
use super::types::{AuditStatus, ToolCallRequest, ToolResult};
use crate::tools::ToolRegistry;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default per-dispatch time budget.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for an aborted tool task to finish dropping.
const ABORT_GRACE: Duration = Duration::from_millis(250);

// ─── ToolDispatcher ─────────────────────────────────────────────────────────

enum Outcome {
    Finished(Result<ToolResult, crate::tools::ToolError>),
    Panicked(String),
    TimedOut,
    Cancelled,
}

/// Dispatches tool calls to registered capabilities.
///
/// Cheap to share: the registry and audit log are behind `Arc`.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
    audit: Option<Arc<AuditLog>>,
}

impl ToolDispatcher {
    /// Create a dispatcher over `registry` with a default time budget.
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
            audit: None,
        }
    }

    /// Record every dispatch in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn audit(&self) -> Option<&AuditLog> {
        self.audit.as_deref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Dispatch a single tool call: lookup → validate → execute → audit.
    pub async fn dispatch(
        &self,
        request: &ToolCallRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let start = Instant::now();
        let name = request.tool_name.as_str();

        // 1. Lookup
        let Some(tool) = self.registry.get(name) else {
            return self.finish(
                request,
                session_id,
                start,
                AuditStatus::UnknownTool,
                ToolResult::failure(format!("Unknown tool: {name}"), None),
            );
        };

        // 2. Validate
        if let Err(e) = self.registry.validate_params(name, &request.parameters) {
            return self.finish(
                request,
                session_id,
                start,
                AuditStatus::InvalidParameters,
                ToolResult::failure(
                    format!("Invalid parameters for '{name}': {e}"),
                    Some(tool.params_schema().to_string()),
                ),
            );
        }

        if cancel.is_cancelled() {
            return self.finish(
                request,
                session_id,
                start,
                AuditStatus::Cancelled,
                ToolResult::failure(format!("Tool '{name}' cancelled"), None),
            );
        }

        // 3. Execute
        let budget = tool.timeout().unwrap_or(self.default_timeout);
        let params = request.parameters.clone();
        let mut handle = tokio::spawn(async move { tool.execute(&params).await });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            joined = tokio::time::timeout(budget, &mut handle) => match joined {
                Err(_) => Outcome::TimedOut,
                Ok(Ok(result)) => Outcome::Finished(result),
                Ok(Err(join_err)) => Outcome::Panicked(panic_message(join_err)),
            },
        };

        if matches!(outcome, Outcome::TimedOut | Outcome::Cancelled) {
            handle.abort();
            let _ = tokio::time::timeout(ABORT_GRACE, &mut handle).await;
        }

        // 4. Normalize
        let (status, result) = match outcome {
            Outcome::Finished(Ok(result)) => {
                let status = if result.success() {
                    AuditStatus::Success
                } else {
                    AuditStatus::Error
                };
                (status, result)
            }
            Outcome::Finished(Err(e)) => (
                AuditStatus::Error,
                ToolResult::failure(e.to_string(), Some(format!("{e:?}"))),
            ),
            Outcome::Panicked(message) => (
                AuditStatus::Panicked,
                ToolResult::failure(format!("Tool '{name}' panicked"), Some(message)),
            ),
            Outcome::TimedOut => (
                AuditStatus::TimedOut,
                ToolResult::failure(
                    format!("Tool '{name}' timed out after {}ms", budget.as_millis()),
                    None,
                ),
            ),
            Outcome::Cancelled => (
                AuditStatus::Cancelled,
                ToolResult::failure(format!("Tool '{name}' cancelled"), None),
            ),
        };

        self.finish(request, session_id, start, status, result)
    }

    /// Log, audit, and hand back the result.
    fn finish(
        &self,
        request: &ToolCallRequest,
        session_id: &str,
        start: Instant,
        status: AuditStatus,
        result: ToolResult,
    ) -> ToolResult {
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if status == AuditStatus::Success {
            tracing::info!(
                tool = %request.tool_name,
                session_id,
                elapsed_ms,
                "tool call succeeded"
            );
        } else {
            tracing::warn!(
                tool = %request.tool_name,
                session_id,
                elapsed_ms,
                status = status.as_str(),
                error = result.error().unwrap_or_default(),
                "tool call failed"
            );
        }

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.insert_audit_entry(
                session_id,
                &request.tool_name,
                &request.parameters_value(),
                result.error(),
                status,
                elapsed_ms,
            ) {
                tracing::warn!(error = %e, "failed to write audit entry");
            }
        }

        result
    }
}

/// Best-effort text of a task panic.
fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    use crate::tools::{Tool, ToolError};

    struct Counting {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "counts calls"
        }
        fn params_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::ok(json!({"ok": true})))
        }
    }

    /// Sets `dropped` when its future is dropped before completing.
    struct Slow {
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "Slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn params_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
            let _flag = DropFlag(self.dropped.clone());
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolResult::ok(json!(null)))
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "Failing"
        }
        fn description(&self) -> &str {
            "always errors"
        }
        fn params_schema(&self) -> Value {
            json!({"type": "object", "required": ["path"]})
        }
        async fn execute(&self, _params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
            Err(ToolError::Io {
                path: "/nope".into(),
                reason: "No such file or directory".into(),
            })
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "Panicking"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn params_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
            panic!("index out of bounds");
        }
    }

    struct Fixture {
        dispatcher: ToolDispatcher,
        calls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
        audit: Arc<AuditLog>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(Counting { name: "Stat", calls: calls.clone() }))
            .unwrap();
        registry.register(Arc::new(Slow { dropped: dropped.clone() })).unwrap();
        registry.register(Arc::new(Failing)).unwrap();
        registry.register(Arc::new(Panicking)).unwrap();
        let audit = Arc::new(AuditLog::open(":memory:").unwrap());
        Fixture {
            dispatcher: ToolDispatcher::new(Arc::new(registry), timeout).with_audit(audit.clone()),
            calls,
            dropped,
            audit,
        }
    }

    fn request(name: &str, params: Value) -> ToolCallRequest {
        ToolCallRequest::new(name, params.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_known_tool_succeeds() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let result = f
            .dispatcher
            .dispatch(&request("Stat", json!({})), "s1", &CancellationToken::new())
            .await;
        assert!(result.success());
        assert_eq!(result.data(), Some(&json!({"ok": true})));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_case_mismatch_is_unknown_and_not_invoked() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let result = f
            .dispatcher
            .dispatch(&request("stat", json!({})), "s1", &CancellationToken::new())
            .await;
        assert!(!result.success());
        assert_eq!(result.error(), Some("Unknown tool: stat"));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);

        let entries = f.audit.get_audit_entries("s1").unwrap();
        assert_eq!(entries[0].result_status, AuditStatus::UnknownTool);
    }

    #[tokio::test]
    async fn test_timeout_returns_within_budget_and_reclaims_task() {
        let f = fixture(Duration::from_millis(100));
        let started = Instant::now();
        let result = f
            .dispatcher
            .dispatch(&request("Slow", json!({})), "s1", &CancellationToken::new())
            .await;
        let elapsed = started.elapsed();

        assert!(!result.success());
        assert_eq!(result.error(), Some("Tool 'Slow' timed out after 100ms"));
        assert!(elapsed < Duration::from_millis(100) + ABORT_GRACE + Duration::from_millis(500));
        assert!(f.dropped.load(Ordering::SeqCst), "tool future should be dropped");
    }

    #[tokio::test]
    async fn test_tool_error_is_captured_with_details() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let result = f
            .dispatcher
            .dispatch(&request("Failing", json!({"path": "/nope"})), "s1", &CancellationToken::new())
            .await;
        assert!(!result.success());
        assert_eq!(
            result.error(),
            Some("I/O error on '/nope': No such file or directory")
        );
        assert!(result.error_details().unwrap().contains("Io"));
    }

    #[tokio::test]
    async fn test_missing_required_param_not_executed() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let result = f
            .dispatcher
            .dispatch(&request("Failing", json!({})), "s1", &CancellationToken::new())
            .await;
        assert!(!result.success());
        assert!(result.error().unwrap().contains("missing required parameter 'path'"));
        let entries = f.audit.get_audit_entries("s1").unwrap();
        assert_eq!(entries[0].result_status, AuditStatus::InvalidParameters);
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let result = f
            .dispatcher
            .dispatch(&request("Panicking", json!({})), "s1", &CancellationToken::new())
            .await;
        assert!(!result.success());
        assert_eq!(result.error(), Some("Tool 'Panicking' panicked"));
        assert_eq!(result.error_details(), Some("index out of bounds"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_in_flight_tool() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = f
            .dispatcher
            .dispatch(&request("Slow", json!({})), "s1", &cancel)
            .await;
        assert_eq!(result.error(), Some("Tool 'Slow' cancelled"));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(f.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_execute() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = f
            .dispatcher
            .dispatch(&request("Stat", json!({})), "s1", &cancel)
            .await;
        assert!(!result.success());
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_dispatch_is_audited() {
        let f = fixture(DEFAULT_TOOL_TIMEOUT);
        let cancel = CancellationToken::new();
        f.dispatcher.dispatch(&request("Stat", json!({})), "s9", &cancel).await;
        f.dispatcher.dispatch(&request("Nope", json!({})), "s9", &cancel).await;
        let counts = f.audit.counts("s9").unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.success, 1);
        assert_eq!(counts.unknown_tool, 1);
    }
}
