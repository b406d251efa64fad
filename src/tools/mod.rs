//! Tools: locally executed capabilities invoked by name.
//!
//! Provides:
//! - The `Tool` trait every capability implements
//! - `ToolRegistry`, the name → capability map built once at startup
//! - Schema validation of required parameters
//! - Rendering of the registry into the system prompt
//!
//! Built-in tools: `Stat`, `ReadFile`, `WriteFile`, `ListDirectory`,
//! `RunScript`, `WebSearch`.

pub mod cache;
pub mod errors;
pub mod filesystem;
pub mod script;
pub mod stat;
pub mod web_search;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent_core::types::ToolResult;
use crate::config::ToolsConfig;

pub use errors::ToolError;

// ─── Tool Trait ──────────────────────────────────────────────────────────────

/// A capability the model can invoke by name.
///
/// Implementations return the `ToolResult` envelope directly for outcomes the
/// model should see as data (including soft failures), and `Err` for faults;
/// the dispatcher converts `Err` into a failed envelope.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry key. Lookup is exact and case-sensitive.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for `parameters`. Only `required` is enforced.
    fn params_schema(&self) -> Value;

    /// Per-tool time budget overriding the dispatcher default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolResult, ToolError>;
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Static mapping from tool name to capability.
///
/// Populated at startup and shared read-only (`Arc<ToolRegistry>`) across
/// sessions afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by exact name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered names, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check that every field listed in the tool's schema `required` array
    /// is present in `params`.
    pub fn validate_params(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
    ) -> Result<(), ToolError> {
        let Some(tool) = self.tools.get(tool_name) else {
            return Ok(());
        };
        let schema = tool.params_schema();
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !params.contains_key(field) {
                    return Err(ToolError::MissingParameter {
                        param: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Render the tool catalogue for the system prompt.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "No tools are available.".to_string();
        }
        let mut out = String::new();
        for name in self.names() {
            if let Some(tool) = self.tools.get(&name) {
                out.push_str(&format!(
                    "- {name}: {}\n  parameters: {}\n",
                    tool.description(),
                    tool.params_schema()
                ));
            }
        }
        out
    }
}

/// Build the registry of built-in tools from configuration.
pub fn builtin_registry(config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let workspace = config.workspace_root.clone();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(stat::StatTool))?;
    registry.register(Arc::new(filesystem::ReadFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(filesystem::WriteFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(filesystem::ListDirectoryTool::new(workspace.clone())))?;
    registry.register(Arc::new(script::RunScriptTool::new(workspace)))?;
    registry.register(Arc::new(web_search::WebSearchTool::from_config(config)?))?;
    tracing::info!(tools = ?registry.names(), "tool registry built");
    Ok(registry)
}

// ─── Parameter Helpers ───────────────────────────────────────────────────────

/// Fetch a required string parameter.
pub(crate) fn require_str<'a>(
    params: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Err(ToolError::MissingParameter {
            param: key.to_string(),
        }),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ToolError::InvalidParameter {
            param: key.to_string(),
            reason: format!("expected string, got {other}"),
        }),
    }
}

/// Fetch an optional unsigned integer parameter.
pub(crate) fn optional_u64(
    params: &Map<String, Value>,
    key: &str,
) -> Result<Option<u64>, ToolError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| ToolError::InvalidParameter {
            param: key.to_string(),
            reason: format!("expected non-negative integer, got {v}"),
        }),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
