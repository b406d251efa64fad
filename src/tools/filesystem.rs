//! Filesystem tools: `ReadFile`, `WriteFile`, `ListDirectory`.
//!
//! When a workspace root is configured, every path must resolve inside it;
//! relative paths are joined onto the root. Without one, relative paths are
//! resolved against the process working directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::{optional_u64, require_str, Tool, ToolError};
use crate::agent_core::tokens::truncate_utf8;
use crate::agent_core::types::ToolResult;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default cap on bytes returned by `ReadFile`.
const DEFAULT_READ_LIMIT: usize = 64 * 1024;

/// Entries returned by `ListDirectory` before truncation.
const MAX_LIST_ENTRIES: usize = 500;

// ─── Path Resolution ────────────────────────────────────────────────────────

/// Expand `~`, join relative paths onto the workspace root, and enforce
/// containment when a root is set.
fn resolve_path(raw: &str, workspace: Option<&Path>) -> Result<PathBuf, ToolError> {
    let expanded = if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| ToolError::InvalidParameter {
            param: "path".into(),
            reason: "cannot resolve home directory".into(),
        })?;
        home.join(rest)
    } else if raw == "~" {
        dirs::home_dir().ok_or_else(|| ToolError::InvalidParameter {
            param: "path".into(),
            reason: "cannot resolve home directory".into(),
        })?
    } else {
        PathBuf::from(raw)
    };

    let Some(root) = workspace else {
        return Ok(expanded);
    };

    // `..` is never needed to name something inside the root.
    if expanded.components().any(|c| c == Component::ParentDir) {
        return Err(ToolError::OutsideWorkspace { path: raw.to_string() });
    }

    let joined = if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    };

    // The target may not exist yet (WriteFile); canonicalize the nearest
    // existing ancestor and re-attach the remainder.
    let canonical_root = root.canonicalize().map_err(|e| io_error(root, e))?;
    let mut existing = joined.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_owned());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut canonical = existing.canonicalize().map_err(|e| io_error(existing, e))?;
    for part in tail.iter().rev() {
        canonical.push(part);
    }

    if !canonical.starts_with(&canonical_root) {
        return Err(ToolError::OutsideWorkspace { path: raw.to_string() });
    }
    Ok(canonical)
}

fn io_error(path: &Path, e: std::io::Error) -> ToolError {
    ToolError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

// ─── ReadFile ───────────────────────────────────────────────────────────────

/// Reads a UTF-8 text file, truncated to `max_bytes`.
pub struct ReadFileTool {
    workspace: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new(workspace: Option<PathBuf>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "ReadFile"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "max_bytes": {"type": "integer", "minimum": 1}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let raw = require_str(params, "path")?;
        let limit = optional_u64(params, "max_bytes")?
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_READ_LIMIT);
        let path = resolve_path(raw, self.workspace.as_deref())?;

        let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let content = truncate_utf8(&text, limit);

        Ok(ToolResult::ok(json!({
            "path": path.display().to_string(),
            "size": bytes.len(),
            "truncated": content.len() < text.len(),
            "content": content,
        })))
    }
}

// ─── WriteFile ──────────────────────────────────────────────────────────────

/// Writes (or appends) text to a file, creating parent directories.
pub struct WriteFileTool {
    workspace: Option<PathBuf>,
}

impl WriteFileTool {
    pub fn new(workspace: Option<PathBuf>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "WriteFile"
    }

    fn description(&self) -> &str {
        "Write text content to a file (set append=true to append)"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
                "append": {"type": "boolean"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let raw = require_str(params, "path")?;
        let content = require_str(params, "content")?;
        let append = params.get("append").and_then(Value::as_bool).unwrap_or(false);
        let path = resolve_path(raw, self.workspace.as_deref())?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| io_error(&path, e))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| io_error(&path, e))?;
        } else {
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| io_error(&path, e))?;
        }

        tracing::debug!(path = %path.display(), bytes = content.len(), append, "file written");
        Ok(ToolResult::ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
            "append": append,
        })))
    }
}

// ─── ListDirectory ──────────────────────────────────────────────────────────

/// A single file/directory entry.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub entry_type: String,
    pub size: u64,
    pub modified: String,
}

/// Lists a directory: directories first, then files, both alphabetical.
pub struct ListDirectoryTool {
    workspace: Option<PathBuf>,
}

impl ListDirectoryTool {
    pub fn new(workspace: Option<PathBuf>) -> Self {
        Self { workspace }
    }
}

/// Check if a file is hidden (dot-prefix convention).
fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "ListDirectory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory (set include_hidden=true for dotfiles)"
    }

    fn params_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "include_hidden": {"type": "boolean"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let raw = require_str(params, "path")?;
        let include_hidden = params
            .get("include_hidden")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let path = resolve_path(raw, self.workspace.as_deref())?;

        if !path.is_dir() {
            return Ok(ToolResult::failure(
                format!("Not a directory: {raw}"),
                None,
            ));
        }

        let mut read_dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(&path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && is_hidden(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(entry = %name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let entry_type = if metadata.is_dir() {
                "dir"
            } else if metadata.file_type().is_symlink() {
                "symlink"
            } else {
                "file"
            };
            let modified = metadata
                .modified()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            entries.push(FileEntry {
                name,
                entry_type: entry_type.to_string(),
                size: metadata.len(),
                modified,
            });
        }

        entries.sort_by(|a, b| {
            let a_is_dir = a.entry_type == "dir";
            let b_is_dir = b.entry_type == "dir";
            b_is_dir
                .cmp(&a_is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        let total = entries.len();
        entries.truncate(MAX_LIST_ENTRIES);

        Ok(ToolResult::ok(json!({
            "path": path.display().to_string(),
            "total": total,
            "truncated": total > MAX_LIST_ENTRIES,
            "entries": entries,
        })))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
