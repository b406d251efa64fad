//! `RunScript`: run a shell command in a child process.
//!
//! On Unix the shell leads its own process group. When the execution future
//! is dropped (timeout or cancellation) the whole group is killed, including
//! anything the script backgrounded. Elsewhere the child falls back to
//! `kill_on_drop`, which only reaches the shell itself.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use super::{optional_u64, require_str, Tool, ToolError};
use crate::agent_core::tokens::truncate_utf8;
use crate::agent_core::types::ToolResult;

/// Cap on captured stdout/stderr returned to the model.
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// Upper bound a caller may request via `timeout_secs`.
const MAX_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs `sh -c <command>` (`cmd /C` on Windows).
pub struct RunScriptTool {
    working_dir: Option<PathBuf>,
}

impl RunScriptTool {
    pub fn new(working_dir: Option<PathBuf>) -> Self {
        Self { working_dir }
    }

    fn build_command(&self, script: &str) -> Command {
        #[cfg(target_os = "windows")]
        let mut cmd = {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(script);
            c
        };
        #[cfg(not(target_os = "windows"))]
        let mut cmd = {
            let mut c = Command::new("sh");
            c.arg("-c").arg(script);
            c
        };

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

// ─── Process group guard ────────────────────────────────────────────────────

/// Kills the child's process group on drop unless disarmed.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    /// The shell exited on its own; leave the group alone.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pgid, "script process group killed"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid, error = %e, "failed to kill script process group"),
    }
}

/// `kill_on_drop` already covers the direct child.
#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[async_trait]
impl Tool for RunScriptTool {
    fn name(&self) -> &str {
        "RunScript"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its exit code, stdout, and stderr"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout_secs": {"type": "integer", "minimum": 1}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let script = require_str(params, "command")?;
        if script.trim().is_empty() {
            return Err(ToolError::InvalidParameter {
                param: "command".into(),
                reason: "command is empty".into(),
            });
        }
        let limit = optional_u64(params, "timeout_secs")?
            .map(Duration::from_secs)
            .unwrap_or(MAX_SCRIPT_TIMEOUT)
            .min(MAX_SCRIPT_TIMEOUT);

        let child = self
            .build_command(script)
            .spawn()
            .map_err(|e| ToolError::ProcessFailed {
                reason: format!("failed to spawn: {e}"),
            })?;

        tracing::debug!(command = %script, pid = ?child.id(), "script started");
        let mut group = GroupGuard::new(child.id());

        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => {
                group.disarm();
                result.map_err(|e| ToolError::ProcessFailed {
                    reason: format!("failed to wait: {e}"),
                })?
            }
            Err(_) => {
                return Ok(ToolResult::failure(
                    format!("script timed out after {}s", limit.as_secs()),
                    Some(script.to_string()),
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let data = json!({
            "exit_code": output.status.code(),
            "stdout": truncate_utf8(&stdout, MAX_OUTPUT_BYTES),
            "stderr": truncate_utf8(&stderr, MAX_OUTPUT_BYTES),
        });

        if output.status.success() {
            Ok(ToolResult::ok(data))
        } else {
            Ok(ToolResult::failure(
                format!("script exited with status {}", output.status),
                Some(truncate_utf8(&stderr, MAX_OUTPUT_BYTES).to_string()),
            ))
        }
    }
}
