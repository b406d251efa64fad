pub mod agent_core;
pub mod commands;
pub mod config;
pub mod inference;
pub mod monitor;
pub mod tools;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use commands::chat::{run_query, run_repl, AgentRuntime};
use commands::confirm::InputLines;
use config::AppConfig;
use monitor::ResourceMonitor;

/// Exit code when the model backend cannot be reached at startup.
pub const EXIT_BACKEND_UNREACHABLE: u8 = 2;

/// Return the platform-standard data directory for turnloop.
///
/// - macOS: `~/Library/Application Support/turnloop/`
/// - Windows: `{FOLDERID_RoamingAppData}\turnloop\`
/// - Linux: `$XDG_DATA_HOME/turnloop/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.turnloop/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("turnloop");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".turnloop")
}

/// Initialize the tracing subscriber, writing structured logs to `log_dir`.
///
/// On each startup:
/// 1. Rotates existing logs (agent.log → agent.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh agent.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the data directory path for discoverability.
///
/// With `verbose`, log lines are mirrored to stderr.
pub fn init_tracing(log_dir: &Path, verbose: bool) -> std::io::Result<PathBuf> {
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("agent.log");

    // Rotate: agent.log.2 → .3, .1 → .2, agent.log → .1
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let flushing_writer = FlushingWriter::new(log_file);

    let writer = if verbose {
        BoxMakeWriter::new(flushing_writer.and(std::io::stderr))
    } else {
        BoxMakeWriter::new(flushing_writer)
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("turnloop=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| std::io::Error::other(format!("tracing already initialized: {e}")))?;

    // Startup banner
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== turnloop starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `agent.log` → `agent.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    // Delete the oldest
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Current → .1
    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// `tracing-subscriber` buffers log output internally. Without explicit
/// flushing, log entries may sit in OS buffers and be lost on crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Entry point ────────────────────────────────────────────────────────────

/// What the binary was asked to do after configuration is resolved.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Answer this query and exit instead of starting the REPL.
    pub query: Option<String>,
}

/// Build the runtime, check the backend, then run the REPL or one query.
pub async fn run(config: AppConfig, data_dir: &Path, options: RunOptions) -> anyhow::Result<ExitCode> {
    let monitor_config = config.monitor.clone();
    let runtime = AgentRuntime::build(config, data_dir)?;

    match runtime.client().health_check().await {
        Ok(()) => {}
        Err(e) if e.is_unreachable() => {
            tracing::error!(
                endpoint = runtime.client().base_url(),
                error = %e,
                "model backend unreachable at startup"
            );
            eprintln!(
                "error: model backend at {} is unreachable: {e}",
                runtime.client().base_url()
            );
            return Ok(ExitCode::from(EXIT_BACKEND_UNREACHABLE));
        }
        // Some servers answer chat completions but not `/models`.
        Err(e) => {
            tracing::warn!(
                endpoint = runtime.client().base_url(),
                error = %e,
                "model health check failed; continuing"
            );
        }
    }

    let mut monitor = monitor_config
        .enabled
        .then(|| ResourceMonitor::start(Duration::from_secs(monitor_config.interval_secs)));

    let code = match options.query {
        Some(query) => {
            if run_query(&runtime, &query).await? {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => {
            run_repl(&runtime, InputLines::stdin(), monitor.as_ref()).await?;
            ExitCode::SUCCESS
        }
    };

    if let Some(monitor) = monitor.as_mut() {
        monitor.stop().await;
    }
    tracing::info!("=== turnloop exiting ===");
    Ok(code)
}
