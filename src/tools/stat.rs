//! `Stat`: host resource statistics.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sysinfo::System;

use super::{Tool, ToolError};
use crate::agent_core::types::ToolResult;

/// Point-in-time host statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub os_name: String,
    pub os_version: String,
    pub host_name: String,
    pub uptime_secs: u64,
    pub cpu_count: usize,
    pub cpu_usage_percent: f32,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub memory_available_mb: u64,
    pub process_count: usize,
}

/// Collect host statistics.
///
/// Blocks briefly while sysinfo samples CPU usage; call from a blocking
/// context.
pub fn collect_host_stats() -> HostStats {
    let mut sys = System::new_all();
    sys.refresh_all();
    // CPU usage needs two samples.
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();

    const MB: u64 = 1024 * 1024;
    HostStats {
        os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
        host_name: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        uptime_secs: System::uptime(),
        cpu_count: sys.cpus().len(),
        cpu_usage_percent: sys.global_cpu_usage(),
        memory_total_mb: sys.total_memory() / MB,
        memory_used_mb: sys.used_memory() / MB,
        memory_available_mb: sys.available_memory() / MB,
        process_count: sys.processes().len(),
    }
}

/// Reports CPU, memory, uptime, and process count.
pub struct StatTool;

#[async_trait]
impl Tool for StatTool {
    fn name(&self) -> &str {
        "Stat"
    }

    fn description(&self) -> &str {
        "Report host statistics: OS, uptime, CPU usage, memory, process count"
    }

    fn params_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let stats = tokio::task::spawn_blocking(collect_host_stats)
            .await
            .map_err(|e| ToolError::Internal {
                reason: format!("stat collection task failed: {e}"),
            })?;
        let data = serde_json::to_value(&stats).map_err(|e| ToolError::Internal {
            reason: e.to_string(),
        })?;
        Ok(ToolResult::ok(data))
    }
}
