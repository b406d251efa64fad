//! Tool error types.
//!
//! A `ToolError` never escapes a dispatch: the dispatcher folds it into a
//! failed `ToolResult` so the model can see and react to it.

use thiserror::Error;

/// Errors raised by tool capabilities and registry construction.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A required parameter was absent.
    #[error("missing required parameter '{param}'")]
    MissingParameter { param: String },

    /// A parameter had the wrong type or an unusable value.
    #[error("invalid parameter '{param}': {reason}")]
    InvalidParameter { param: String, reason: String },

    /// Filesystem operation failed.
    #[error("I/O error on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// Path resolved outside the configured workspace root.
    #[error("path '{path}' is outside the workspace root")]
    OutsideWorkspace { path: String },

    /// Child process could not be spawned or waited on.
    #[error("process failed: {reason}")]
    ProcessFailed { reason: String },

    /// HTTP request to an external service failed.
    #[error("network error: {reason}")]
    Network { reason: String },

    /// Unexpected fault inside the tool body.
    #[error("internal tool error: {reason}")]
    Internal { reason: String },

    /// Two tools registered under the same name.
    #[error("duplicate tool name: '{name}'")]
    DuplicateTool { name: String },
}
