//! Configuration loading, validation, and management for Helmsman.
//!
//! Loads configuration from `~/.helmsman/config.toml` with environment
//! variable overrides. Validates all settings at startup. Every section has
//! documented defaults, so an absent file is a valid configuration.

use helmsman_core::guard::AccessLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Turns between "budget remaining" nudges. Not configurable from files.
pub const REFLECTION_INTERVAL: u32 = 8;

/// The root configuration structure.
///
/// Maps directly to `~/.helmsman/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model selection and sampling
    #[serde(default)]
    pub model: ModelConfig,

    /// Per-run budgets
    #[serde(default)]
    pub run: RunConfig,

    /// Tool dispatch limits
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Human approval timeouts
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Reference authorization policy
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Budgets for one agent run. Immutable for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Tool-enabled model calls per cycle
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Upper bound on a single model call
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,

    /// Extra cycles granted when the model is still using tools
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,

    /// Fixed nudge cadence; only overridable in code
    #[serde(skip, default = "default_reflection_interval")]
    pub reflection_interval: u32,

    /// Consecutive overflow retries before the run fails
    #[serde(default = "default_max_compaction_attempts")]
    pub max_compaction_attempts: u32,
}

fn default_max_turns() -> u32 {
    25
}
fn default_turn_timeout_secs() -> u64 {
    60
}
fn default_max_continuations() -> u32 {
    2
}
fn default_reflection_interval() -> u32 {
    REFLECTION_INTERVAL
}
fn default_max_compaction_attempts() -> u32 {
    3
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            turn_timeout_secs: default_turn_timeout_secs(),
            max_continuations: default_max_continuations(),
            reflection_interval: default_reflection_interval(),
            max_compaction_attempts: default_max_compaction_attempts(),
        }
    }
}

impl RunConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    /// Upper bound on tool-enabled model calls across all cycles.
    pub fn max_total_turns(&self) -> u32 {
        self.max_turns.saturating_mul(1 + self.max_continuations)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Allow independent calls in one batch to run concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,

    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_long_running_timeout_secs")]
    pub long_running_timeout_secs: u64,

    /// Tools that get the long-running timeout
    #[serde(default = "default_long_running_tools")]
    pub long_running_tools: Vec<String>,

    /// Tools that mutate shared process state; a batch naming any of
    /// them runs strictly in order
    #[serde(default = "default_sequential_tools")]
    pub sequential_tools: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_max_parallel() -> usize {
    5
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_long_running_timeout_secs() -> u64 {
    600
}
fn default_long_running_tools() -> Vec<String> {
    vec![
        "shell".into(),
        "exec".into(),
        "browser".into(),
        "deep_research".into(),
        "remote_session".into(),
    ]
}
fn default_sequential_tools() -> Vec<String> {
    vec![
        "shell".into(),
        "exec".into(),
        "file_write".into(),
        "write_file".into(),
        "apply_patch".into(),
        "remote_session".into(),
        "ssh".into(),
    ]
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_parallel: default_max_parallel(),
            default_timeout_secs: default_tool_timeout_secs(),
            long_running_timeout_secs: default_long_running_timeout_secs(),
            long_running_tools: default_long_running_tools(),
            sequential_tools: default_sequential_tools(),
        }
    }
}

impl DispatchConfig {
    pub fn is_sequential(&self, tool_name: &str) -> bool {
        self.sequential_tools.iter().any(|t| t == tool_name)
    }

    pub fn is_long_running(&self, tool_name: &str) -> bool {
        self.long_running_tools.iter().any(|t| t == tool_name)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn long_running_timeout(&self) -> Duration {
        Duration::from_secs(self.long_running_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// How long a pending approval waits for a human
    #[serde(default = "default_approval_wait_secs")]
    pub wait_timeout_secs: u64,

    /// Timeout for executing a tool once approved
    #[serde(default = "default_approval_exec_secs")]
    pub execution_timeout_secs: u64,
}

fn default_approval_wait_secs() -> u64 {
    600
}
fn default_approval_exec_secs() -> u64 {
    600
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_approval_wait_secs(),
            execution_timeout_secs: default_approval_exec_secs(),
        }
    }
}

impl ApprovalConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

/// Rules for the reference `PolicyGuard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Access level assumed for callers with no explicit level
    #[serde(default)]
    pub default_level: AccessLevel,

    /// Minimum access level per tool; unlisted tools need `guest`
    #[serde(default)]
    pub tool_levels: HashMap<String, AccessLevel>,

    /// Tools that need human confirmation
    #[serde(default = "default_confirm_tools")]
    pub confirm_tools: Vec<String>,

    /// Callers at or above this level skip confirmation
    #[serde(default = "default_confirm_exempt_level")]
    pub confirm_exempt_level: AccessLevel,

    /// Tools nobody may call
    #[serde(default)]
    pub denied_tools: Vec<String>,
}

fn default_confirm_tools() -> Vec<String> {
    vec!["shell".into(), "file_write".into(), "remote_session".into()]
}
fn default_confirm_exempt_level() -> AccessLevel {
    AccessLevel::Admin
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_level: AccessLevel::default(),
            tool_levels: HashMap::new(),
            confirm_tools: default_confirm_tools(),
            confirm_exempt_level: default_confirm_exempt_level(),
            denied_tools: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.helmsman/config.toml).
    ///
    /// Environment variables override file values:
    /// - `HELMSMAN_MODEL`
    /// - `HELMSMAN_MAX_TURNS`
    /// - `HELMSMAN_MAX_PARALLEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("HELMSMAN_MODEL") {
            self.model.name = model;
        }

        if let Some(raw) = lookup("HELMSMAN_MAX_TURNS") {
            self.run.max_turns = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("HELMSMAN_MAX_TURNS must be an integer, got '{raw}'"))
            })?;
        }

        if let Some(raw) = lookup("HELMSMAN_MAX_PARALLEL") {
            self.dispatch.max_parallel = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("HELMSMAN_MAX_PARALLEL must be an integer, got '{raw}'"))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".helmsman")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.run.max_turns == 0 {
            return Err(ConfigError::ValidationError("run.max_turns must be > 0".into()));
        }

        if self.run.turn_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("run.turn_timeout_secs must be > 0".into()));
        }

        if self.dispatch.max_parallel == 0 {
            return Err(ConfigError::ValidationError("dispatch.max_parallel must be > 0".into()));
        }

        if self.dispatch.default_timeout_secs == 0 || self.dispatch.long_running_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("dispatch timeouts must be > 0".into()));
        }

        if self.approval.wait_timeout_secs == 0 || self.approval.execution_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("approval timeouts must be > 0".into()));
        }

        Ok(())
    }

    /// Render the default configuration as TOML.
    pub fn default_toml() -> String {
        Self::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
