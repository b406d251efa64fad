//! Configuration loading and validation.
//!
//! Reads `config.yaml` and resolves environment variables. Every section and
//! field has a default, so a missing file or a partial file is valid.
//!
//! Lookup order for the file: `--config` flag, `TURNLOOP_CONFIG` env var,
//! then `<data_dir>/config.yaml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TURNLOOP_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// YAML did not match the expected shape.
    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    /// A value parsed but is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Model backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible base URL, e.g. `http://localhost:11434/v1`.
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Hard limit for one chat completion request.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model_name: "qwen2.5:7b".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            request_timeout_secs: 120,
        }
    }
}

/// Orchestrator loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum model calls per user request.
    pub max_iterations: u32,
    /// Retention window for the conversation, system turn included.
    pub max_turns: usize,
    /// Replaces the generated system prompt when set.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_turns: 40,
            system_prompt: None,
        }
    }
}

/// Tool dispatch and built-in tool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Default per-dispatch time budget.
    pub timeout_secs: u64,
    /// Restrict filesystem tools (and the script working dir) to this tree.
    pub workspace_root: Option<PathBuf>,
    pub search_endpoint: String,
    pub blocked_domains: Vec<String>,
    pub domain_cache_ttl_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            workspace_root: None,
            search_endpoint: "https://api.duckduckgo.com/".to_string(),
            blocked_domains: Vec::new(),
            domain_cache_ttl_secs: 3600,
        }
    }
}

/// Multi-step plan settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Route template-matched requests through the plan gate.
    pub enabled: bool,
    /// Ask before running multi-step plans.
    pub require_confirmation: bool,
    /// Record failed steps and keep going instead of halting.
    pub continue_on_failure: bool,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_confirmation: true,
            continue_on_failure: false,
        }
    }
}

/// Background resource monitor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30,
        }
    }
}

/// Audit log settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Defaults to `<data_dir>/audit.db`.
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Top-level configuration (mirrors `config.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub planning: PlanningConfig,
    pub monitor: MonitorConfig,
    pub audit: AuditConfig,
}

impl AppConfig {
    /// Reject values the runtime cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "agent.max_iterations".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.agent.max_turns < 2 {
            return Err(ConfigError::Invalid {
                field: "agent.max_turns".into(),
                reason: "must be at least 2 (system turn plus one)".into(),
            });
        }
        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "tools.timeout_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
        if domain_cache_ttl(self.tools.domain_cache_ttl_secs).is_none() {
            return Err(ConfigError::Invalid {
                field: "tools.domain_cache_ttl_secs".into(),
                reason: "out of range".into(),
            });
        }
        if self.monitor.enabled && self.monitor.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.interval_secs".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Domain-verdict TTL as a `chrono` duration, `None` when out of range.
pub fn domain_cache_ttl(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Resolve which config file to read, if any.
///
/// An explicit path is returned even if it does not exist, so the caller
/// reports the error; the implicit data-dir location is optional.
pub fn find_config_path(explicit: Option<&Path>, data_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let candidate = data_dir.join("config.yaml");
    candidate.exists().then_some(candidate)
}

/// Load configuration from `path`, or defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        tracing::info!("no config file found, using defaults");
        return Ok(AppConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let config = parse_config(&raw)?;
    tracing::info!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Parse YAML text after env-var interpolation, then validate.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    // An empty file deserializes to unit; treat it as all defaults.
    let mut config: AppConfig = if interpolated.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?
    };

    config.tools.workspace_root = config
        .tools
        .workspace_root
        .map(|p| PathBuf::from(expand_tilde(&p.to_string_lossy())));
    config.audit.path = config
        .audit
        .path
        .map(|p| PathBuf::from(expand_tilde(&p.to_string_lossy())));

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand `~` or a leading `~/` to the user's home directory.
///
/// `~user/...` is left alone: other users' homes are not resolved.
fn expand_tilde(path: &str) -> String {
    if path != "~" && !path.starts_with("~/") {
        return path.to_string();
    }
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.display(), &path[1..]),
        None => path.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
