//! turnloop: terminal entry point.
//!
//! Resolves configuration (file, then flags), initializes logging, and hands
//! off to the REPL or a single query.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use turnloop::config::{find_config_path, load_config, AppConfig};
use turnloop::{data_dir, init_tracing, run, RunOptions};

/// Bounded tool-calling assistant for a local model
#[derive(Parser, Debug)]
#[command(name = "turnloop")]
#[command(about = "Bounded tool-calling assistant for a local model", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yaml (overrides $TURNLOOP_CONFIG and the data-dir default)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model endpoint base URL (OpenAI-compatible, e.g. http://localhost:11434/v1)
    #[arg(long)]
    model_url: Option<String>,

    /// Model name sent with each request
    #[arg(long)]
    model: Option<String>,

    /// Maximum model calls per request
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Restrict file tools to this directory
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Skip confirmation for multi-step plans (low-confidence plans still ask)
    #[arg(long, short = 'y')]
    yes: bool,

    /// Keep running plan steps after one fails
    #[arg(long)]
    continue_on_failure: bool,

    /// Answer one query and exit
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// Mirror logs to stderr
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Cli {
    /// Flags win over file values.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(url) = &self.model_url {
            config.model.base_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.model.model_name = model.clone();
        }
        if let Some(n) = self.max_iterations {
            config.agent.max_iterations = n;
        }
        if let Some(dir) = &self.workspace {
            config.tools.workspace_root = Some(dir.clone());
        }
        if self.yes {
            config.planning.require_confirmation = false;
        }
        if self.continue_on_failure {
            config.planning.continue_on_failure = true;
        }
    }
}

fn resolve_config(cli: &Cli, data_dir: &std::path::Path) -> anyhow::Result<AppConfig> {
    let path = find_config_path(cli.config.as_deref(), data_dir);
    let mut config = load_config(path.as_deref()).context("loading configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("validating configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = data_dir();

    if let Err(e) = init_tracing(&data_dir, cli.verbose) {
        eprintln!("warning: logging disabled: {e}");
    }

    let config = match resolve_config(&cli, &data_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "configuration error");
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let options = RunOptions {
        query: cli.query.clone(),
    };
    match run(config, &data_dir, options).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal error");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
