//! Chat surface: runtime assembly, the system prompt, and the REPL.
//!
//! Bridges the terminal to the agent core (Session, Orchestrator,
//! ToolDispatcher) and the inference client.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use super::confirm::{InputLines, TerminalConfirmer};
use super::session::{parse_input, render_stats, render_tools, SessionCommand, HELP_TEXT};
use crate::agent_core::plan_gate::ConfirmationChannel;
use crate::agent_core::{AuditLog, Orchestrator, OutcomeKind, Reply, Session, ToolDispatcher};
use crate::config::AppConfig;
use crate::inference::{ChatBackend, InferenceClient, InferenceError};
use crate::monitor::ResourceMonitor;
use crate::tools::{builtin_registry, ToolRegistry};

// ─── System prompt ──────────────────────────────────────────────────────────

/// Identity and intro, the static portion of the system prompt.
const SYSTEM_PROMPT_INTRO: &str = "\
You are turnloop, an assistant running on the user's machine. You can call local \
tools to inspect the system, read and write files, run shell commands, and search \
the web.";

/// How to call a tool, and the behavioral rules.
const SYSTEM_PROMPT_RULES: &str = "\
To call a tool, reply with exactly one JSON object of this shape, and nothing \
that looks like a second one:\n\
  {\"tool_to_use\": \"<tool name>\", \"parameters\": {<parameters>}}\n\n\
Rules:\n\
1. Call at most ONE tool per reply. You will receive its result as a message \
starting with \"Tool result:\".\n\
2. Tool names are case-sensitive. Use them exactly as listed.\n\
3. If a tool result has \"success\": false, read the error. Retry with corrected \
parameters or explain the failure to the user.\n\
4. TRUTHFULNESS: Only report results you actually received from tool calls. \
Never invent data.\n\
5. When you have enough information, answer in plain text without any JSON.\n\n\
Example:\n\
  User: \"How much memory is in use?\"\n\
  You: {\"tool_to_use\": \"Stat\", \"parameters\": {}}\n\
  (tool result arrives)\n\
  You: \"About 6.1 GB of 16 GB is in use.\"";

/// Build the system prompt from the registered tools.
///
/// The prompt has three parts:
/// 1. Identity and intro (static)
/// 2. Tool catalogue (generated from the registry)
/// 3. Wire format and behavioral rules (static)
pub fn build_system_prompt(registry: &ToolRegistry, workspace_root: Option<&Path>) -> String {
    let tools = registry.describe();
    let workspace = workspace_root
        .map(|root| format!("\n\nFile tools only work inside {}.", root.display()))
        .unwrap_or_default();
    format!("{SYSTEM_PROMPT_INTRO}{workspace}\n\nAvailable tools:\n{tools}\n{SYSTEM_PROMPT_RULES}")
}

// ─── Runtime ────────────────────────────────────────────────────────────────

/// Everything a session needs, built once at startup.
pub struct AgentRuntime {
    config: AppConfig,
    registry: Arc<ToolRegistry>,
    audit: Option<Arc<AuditLog>>,
    client: Arc<InferenceClient>,
    orchestrator: Arc<Orchestrator>,
    system_prompt: String,
}

impl AgentRuntime {
    /// Build the registry, audit log, model client, and orchestrator.
    pub fn build(config: AppConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let registry = Arc::new(builtin_registry(&config.tools).context("building tool registry")?);

        let audit = if config.audit.enabled {
            let path = config
                .audit
                .path
                .clone()
                .unwrap_or_else(|| data_dir.join("audit.db"));
            match AuditLog::open(&path.to_string_lossy()) {
                Ok(log) => {
                    tracing::info!(path = %path.display(), "audit log opened");
                    Some(Arc::new(log))
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "audit log unavailable; continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let mut dispatcher = ToolDispatcher::new(
            registry.clone(),
            Duration::from_secs(config.tools.timeout_secs),
        );
        if let Some(audit) = &audit {
            dispatcher = dispatcher.with_audit(audit.clone());
        }

        let client = Arc::new(InferenceClient::from_config(&config.model).context("building model client")?);
        let backend: Arc<dyn ChatBackend> = client.clone();
        let orchestrator = Arc::new(Orchestrator::new(
            backend,
            Arc::new(dispatcher),
            config.agent.max_iterations,
        ));

        let system_prompt = config.agent.system_prompt.clone().unwrap_or_else(|| {
            build_system_prompt(&registry, config.tools.workspace_root.as_deref())
        });

        Ok(Self {
            config,
            registry,
            audit,
            client,
            orchestrator,
            system_prompt,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Start a fresh session.
    pub fn new_session(&self) -> Session {
        Session::new(
            self.orchestrator.clone(),
            self.system_prompt.clone(),
            self.config.agent.max_turns,
            &self.config.planning,
        )
    }
}

// ─── Request handling ───────────────────────────────────────────────────────

/// Run one request with Ctrl-C wired to its cancellation token.
pub async fn ask(
    session: &mut Session,
    query: &str,
    channel: &dyn ConfirmationChannel,
) -> Result<Reply, InferenceError> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling request");
            on_interrupt.cancel();
        }
    });

    let result = session.handle_input(query, channel, &cancel).await;
    interrupt.abort();
    result
}

/// What the prompt produced.
#[derive(Debug, PartialEq, Eq)]
enum PromptInput {
    Line(String),
    EndOfInput,
    Interrupted,
}

/// Read one prompt line, or stop early if `interrupt` resolves first.
///
/// `ask` installs a process-wide SIGINT listener, so after the first request
/// Ctrl-C no longer terminates the process by default; the prompt has to
/// watch for it itself.
async fn read_prompt<F>(input: &InputLines, interrupt: F) -> std::io::Result<PromptInput>
where
    F: std::future::Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = interrupt => Ok(PromptInput::Interrupted),
        line = input.next_line() => Ok(match line? {
            Some(line) => PromptInput::Line(line),
            None => PromptInput::EndOfInput,
        }),
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Print a reply or a transport error. Returns `false` on error.
fn print_reply(result: &Result<Reply, InferenceError>) -> bool {
    match result {
        Ok(reply) => {
            if let Reply::Answer(outcome) = reply {
                if outcome.kind == OutcomeKind::MaxIterationsReached {
                    eprintln!(
                        "warning: stopped after {} model calls ({} tool calls)",
                        outcome.iterations,
                        outcome.tool_calls.len()
                    );
                }
            }
            println!("{}", reply.text());
            true
        }
        Err(e) => {
            eprintln!("error: model backend failed: {e}");
            false
        }
    }
}

/// Answer a single query and return. `Ok(false)` means the backend failed.
pub async fn run_query(runtime: &AgentRuntime, query: &str) -> anyhow::Result<bool> {
    let input = InputLines::stdin();
    let confirmer = TerminalConfirmer::new(input);
    let mut session = runtime.new_session();
    let result = ask(&mut session, query, &confirmer).await;
    Ok(print_reply(&result))
}

/// Interactive loop until `/exit` or end of input.
pub async fn run_repl(
    runtime: &AgentRuntime,
    input: InputLines,
    monitor: Option<&ResourceMonitor>,
) -> anyhow::Result<()> {
    let confirmer = TerminalConfirmer::new(input.clone());
    // Created on the first query.
    let mut session: Option<Session> = None;

    println!(
        "turnloop {} | model {} at {} | {} tools | /help for commands",
        env!("CARGO_PKG_VERSION"),
        runtime.client.model_name(),
        runtime.client.base_url(),
        runtime.registry.len()
    );

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match read_prompt(&input, ctrl_c()).await.context("reading input")? {
            PromptInput::Line(line) => line,
            PromptInput::EndOfInput => {
                println!();
                break;
            }
            PromptInput::Interrupted => {
                println!();
                tracing::info!("interrupt at prompt; leaving REPL");
                break;
            }
        };

        match parse_input(&line) {
            SessionCommand::Exit => break,
            SessionCommand::Empty => {}
            SessionCommand::Help => println!("{HELP_TEXT}"),
            SessionCommand::Tools => print!("{}", render_tools(&runtime.registry)),
            SessionCommand::Clear => {
                let removed = session.as_mut().map(Session::clear).unwrap_or(0);
                println!("Conversation cleared ({removed} turns removed).");
            }
            SessionCommand::Stats => {
                let audit = match (&session, &runtime.audit) {
                    (Some(s), Some(log)) => log
                        .counts(s.id())
                        .map_err(|e| tracing::warn!(error = %e, "audit counts unavailable"))
                        .ok(),
                    _ => None,
                };
                let sample = monitor.and_then(ResourceMonitor::latest);
                print!("{}", render_stats(session.as_ref(), audit.as_ref(), sample.as_ref()));
            }
            SessionCommand::Unknown(cmd) => {
                println!("Unknown command {cmd}. Type /help for the list.");
            }
            SessionCommand::Query(query) => {
                let session = session.get_or_insert_with(|| runtime.new_session());
                let result = ask(session, &query, &confirmer).await;
                print_reply(&result);
            }
        }
    }

    tracing::info!("REPL exited");
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
