//! Terminal commands exposed to the operator.
//!
//! `chat` runs the REPL and single queries, `session` classifies sentinel
//! input and renders `/stats` and `/tools`, `confirm` is the yes/no channel.

pub mod chat;
pub mod confirm;
pub mod session;
