//! Inference: talking to the model and reading its replies.
//!
//! This module handles all communication with the model endpoint:
//! - Non-streaming chat completions against an OpenAI-compatible API
//! - Wire types and the mapping from conversation turns to chat messages
//! - Extraction of an embedded tool call from free model text
//!
//! The orchestrator only sees the `ChatBackend` trait, so the endpoint is
//! interchangeable via config and replaceable in tests.

pub mod client;
pub mod errors;
pub mod tool_call_parser;
pub mod types;

// Re-exports for convenience
pub use client::{ChatBackend, InferenceClient};
pub use errors::InferenceError;
pub use tool_call_parser::extract_tool_call;
pub use types::{ChatMessage, Role};
