//! Configuration loading, validation, and management for Runwright.
//!
//! Loads engine configuration from `~/.runwright/config.toml` with
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use runwright_core::tool::{ErrorBehavior, TimeoutBehavior, ToolPolicy};

/// The root configuration structure.
///
/// Maps directly to `~/.runwright/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum model turns per run before the max-turns handler (or error)
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Dispatch the tool calls of one turn concurrently
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,

    /// What happens after tools run
    #[serde(default)]
    pub tool_use_behavior: ToolUseBehaviorConfig,

    /// Defaults applied to every tool without its own policy
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_turns() -> u32 {
    10
}
fn default_true() -> bool {
    true
}

/// Tool-use policy as written in the config file.
///
/// Either a bare name (`"run_llm_again"`, `"stop_on_first_tool"`) or a table
/// with `stop_at_tool_names`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolUseBehaviorConfig {
    Named(String),
    StopAt { stop_at_tool_names: Vec<String> },
}

pub const RUN_LLM_AGAIN: &str = "run_llm_again";
pub const STOP_ON_FIRST_TOOL: &str = "stop_on_first_tool";

impl Default for ToolUseBehaviorConfig {
    fn default() -> Self {
        Self::Named(RUN_LLM_AGAIN.into())
    }
}

impl ToolUseBehaviorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Named(name) if name == RUN_LLM_AGAIN || name == STOP_ON_FIRST_TOOL => Ok(()),
            Self::Named(name) => Err(ConfigError::ValidationError(format!(
                "unknown tool_use_behavior '{name}' (expected '{RUN_LLM_AGAIN}', \
                 '{STOP_ON_FIRST_TOOL}' or {{ stop_at_tool_names = [..] }})"
            ))),
            Self::StopAt { stop_at_tool_names } if stop_at_tool_names.is_empty() => Err(
                ConfigError::ValidationError("stop_at_tool_names must not be empty".into()),
            ),
            Self::StopAt { .. } => Ok(()),
        }
    }
}

/// Defaults for tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Timeout applied to tools without their own (unset = no timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,

    #[serde(default)]
    pub timeout_behavior: TimeoutBehavior,

    #[serde(default)]
    pub error_behavior: ErrorBehavior,

    /// Text fed back to the model when a call is rejected
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

pub const DEFAULT_REJECTION_MESSAGE: &str = "Tool execution was not approved.";

fn default_rejection_message() -> String {
    DEFAULT_REJECTION_MESSAGE.into()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            timeout_behavior: TimeoutBehavior::default(),
            error_behavior: ErrorBehavior::default(),
            rejection_message: default_rejection_message(),
        }
    }
}

impl ToolsConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    /// The policy a tool gets when it is registered without one.
    pub fn default_policy(&self) -> ToolPolicy {
        let mut policy = ToolPolicy::default().with_error_behavior(self.error_behavior);
        if let Some(timeout) = self.default_timeout() {
            policy = policy.with_timeout(timeout, self.timeout_behavior);
        }
        policy
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "runwright_agent=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            parallel_tool_calls: true,
            tool_use_behavior: ToolUseBehaviorConfig::default(),
            tools: ToolsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.runwright/config.toml).
    ///
    /// Environment variables override the file:
    /// - `RUNWRIGHT_MAX_TURNS`
    /// - `RUNWRIGHT_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("RUNWRIGHT_MAX_TURNS") {
            self.max_turns = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "RUNWRIGHT_MAX_TURNS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Some(level) = lookup("RUNWRIGHT_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".runwright")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "max_turns must be at least 1".into(),
            ));
        }

        if self.tools.default_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "tools.default_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.level must not be empty".into(),
            ));
        }

        self.tool_use_behavior.validate()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
