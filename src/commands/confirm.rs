//! Terminal confirmation channel and the shared stdin line reader.
//!
//! The REPL and the confirmation prompt read from the same buffered stdin,
//! so both go through one `InputLines` handle.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

use crate::agent_core::plan_gate::{is_affirmative, ConfirmationChannel};

/// Shared line reader over the operator's input.
#[derive(Clone)]
pub struct InputLines {
    lines: Arc<Mutex<Lines<Box<dyn AsyncBufRead + Unpin + Send>>>>,
}

impl InputLines {
    pub fn new(reader: Box<dyn AsyncBufRead + Unpin + Send>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(reader.lines())),
        }
    }

    pub fn stdin() -> Self {
        Self::new(Box::new(BufReader::new(tokio::io::stdin())))
    }

    /// Next line without its terminator; `None` at end of input.
    pub async fn next_line(&self) -> std::io::Result<Option<String>> {
        self.lines.lock().await.next_line().await
    }
}

/// Asks the operator on the terminal.
pub struct TerminalConfirmer {
    input: InputLines,
}

impl TerminalConfirmer {
    pub fn new(input: InputLines) -> Self {
        Self { input }
    }
}

#[async_trait]
impl ConfirmationChannel for TerminalConfirmer {
    fn notify(&self, message: &str) {
        println!("{message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    async fn confirm(&self, prompt: &str) -> bool {
        print!("{prompt} ");
        let _ = std::io::stdout().flush();

        match self.input.next_line().await {
            Ok(Some(answer)) => {
                let approved = is_affirmative(&answer);
                tracing::info!(approved, "operator answered confirmation prompt");
                approved
            }
            Ok(None) => {
                tracing::info!("input closed at confirmation prompt; treating as decline");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read confirmation; treating as decline");
                false
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
