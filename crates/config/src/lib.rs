//! Configuration loading, validation, and management for Conductor.
//!
//! Loads configuration from `~/.conductor/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.conductor/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used for decomposition, mini-planning and reflection.
    /// Falls back to `default_model` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning_model: Option<String>,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Per-call provider timeout in the fallback chain
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub planning: PlanningConfig,

    #[serde(default)]
    pub learning: LearningConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_provider_timeout() -> u64 {
    120
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("planning_model", &self.planning_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("analyzer", &self.analyzer)
            .field("retry", &self.retry)
            .field("planning", &self.planning)
            .field("learning", &self.learning)
            .field("execution", &self.execution)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Complexity analyzer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Scores at or above this go through orchestration.
    #[serde(default = "default_orchestration_threshold")]
    pub orchestration_threshold: u8,
}

fn default_orchestration_threshold() -> u8 {
    5
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            orchestration_threshold: default_orchestration_threshold(),
        }
    }
}

/// Adaptive retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per subtask, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Step timeouts are multiplied by this when a same-cause retry escalates.
    #[serde(default = "default_escalation_timeout_factor")]
    pub escalation_timeout_factor: u32,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_escalation_timeout_factor() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            escalation_timeout_factor: default_escalation_timeout_factor(),
        }
    }
}

/// Decomposition, mini-planning and reflection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    #[serde(default = "default_min_subtasks")]
    pub min_subtasks: usize,

    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,

    /// Run the adversarial pre-flight pass.
    #[serde(default = "default_true")]
    pub preflight: bool,

    /// Extract lessons after execution.
    #[serde(default = "default_true")]
    pub postflight: bool,

    /// Max tokens for structured planning responses.
    #[serde(default = "default_planning_max_tokens")]
    pub max_tokens: u32,
}

fn default_min_subtasks() -> usize {
    3
}
fn default_max_subtasks() -> usize {
    7
}
fn default_planning_max_tokens() -> u32 {
    1024
}
fn default_true() -> bool {
    true
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            min_subtasks: default_min_subtasks(),
            max_subtasks: default_max_subtasks(),
            preflight: true,
            postflight: true,
            max_tokens: default_planning_max_tokens(),
        }
    }
}

/// Experience store and approval gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Snapshot file; defaults to `~/.conductor/experience.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Minimum usage count before an agent-scoped lesson is promoted.
    #[serde(default = "default_promotion_usage")]
    pub promotion_usage_threshold: u32,

    /// Minimum positive-feedback ratio for promotion.
    #[serde(default = "default_promotion_ratio")]
    pub promotion_success_ratio: f32,

    /// Similarity above which a proposal duplicates an existing lesson.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Similarity above which a stored workflow matches a goal.
    #[serde(default = "default_workflow_match")]
    pub workflow_match_threshold: f32,

    /// Lessons retrieved as hints per run.
    #[serde(default = "default_lesson_top_k")]
    pub lesson_top_k: usize,

    /// Minimum similarity for a lesson to count as a hint.
    #[serde(default = "default_lesson_min_score")]
    pub lesson_min_score: f32,

    /// Dimensions of the local hashing embedder.
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Provider embedding model; when unset the local embedder is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

fn default_promotion_usage() -> u32 {
    10
}
fn default_promotion_ratio() -> f32 {
    0.8
}
fn default_dedup_threshold() -> f32 {
    0.92
}
fn default_workflow_match() -> f32 {
    0.90
}
fn default_lesson_top_k() -> usize {
    5
}
fn default_lesson_min_score() -> f32 {
    0.3
}
fn default_embedding_dimensions() -> usize {
    256
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            promotion_usage_threshold: default_promotion_usage(),
            promotion_success_ratio: default_promotion_ratio(),
            dedup_threshold: default_dedup_threshold(),
            workflow_match_threshold: default_workflow_match(),
            lesson_top_k: default_lesson_top_k(),
            lesson_min_score: default_lesson_min_score(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_model: None,
        }
    }
}

impl LearningConfig {
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("experience.json"))
    }
}

/// Reference execution unit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Default per-step timeout.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Program names shell steps may run. Empty = allow anything not blocked.
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Program names that are always refused.
    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    /// Tool names advertised to planners and execution units.
    #[serde(default = "default_available_tools")]
    pub available_tools: Vec<String>,

    /// Working directory for shell steps; defaults to `~/.conductor/workspace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_tool_timeout() -> u64 {
    300
}

fn default_allowed_commands() -> Vec<String> {
    [
        "npm", "node", "npx", "pnpm", "yarn", "tsc", "python", "python3", "pip", "pip3", "git",
        "gcc", "g++", "make", "cargo", "ls", "cat", "echo", "mkdir", "pwd", "cp", "mv", "rm",
        "touch", "chmod", "grep", "find", "sed", "awk",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_blocked_commands() -> Vec<String> {
    [
        "sudo", "su", "passwd", "useradd", "usermod", "fdisk", "mkfs", "mount", "umount",
        "iptables", "reboot", "shutdown", "init",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_available_tools() -> Vec<String> {
    vec!["shell".into(), "llm".into()]
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            allowed_commands: default_allowed_commands(),
            blocked_commands: default_blocked_commands(),
            available_tools: default_available_tools(),
            working_dir: None,
        }
    }
}

impl ExecutionConfig {
    pub fn resolved_working_dir(&self) -> PathBuf {
        self.working_dir.clone().unwrap_or_else(AppConfig::workspace_dir)
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.conductor/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CONDUCTOR_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `CONDUCTOR_PROVIDER`, `CONDUCTOR_MODEL`, `CONDUCTOR_MAX_RETRIES`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup`, then re-validate.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            self.api_key = lookup("CONDUCTOR_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(provider) = lookup("CONDUCTOR_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("CONDUCTOR_MODEL") {
            self.default_model = model;
        }

        if let Some(raw) = lookup("CONDUCTOR_MAX_RETRIES") {
            let retries: u32 = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("CONDUCTOR_MAX_RETRIES must be an integer, got '{raw}'"))
            })?;
            self.retry.max_attempts = retries;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".conductor")
    }

    /// Get the workspace directory path.
    pub fn workspace_dir() -> PathBuf {
        Self::config_dir().join("workspace")
    }

    /// The model used for planning stages.
    pub fn planning_model(&self) -> &str {
        self.planning_model.as_deref().unwrap_or(&self.default_model)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.analyzer.orchestration_threshold > 10 {
            return Err(ConfigError::ValidationError(
                "analyzer.orchestration_threshold must be between 0 and 10".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.backoff_base_ms > self.retry.backoff_cap_ms {
            return Err(ConfigError::ValidationError(
                "retry.backoff_base_ms must not exceed retry.backoff_cap_ms".into(),
            ));
        }

        if self.planning.min_subtasks == 0 || self.planning.min_subtasks > self.planning.max_subtasks {
            return Err(ConfigError::ValidationError(
                "planning.min_subtasks must be between 1 and planning.max_subtasks".into(),
            ));
        }

        let unit = |v: f32| (0.0..=1.0).contains(&v);
        if !unit(self.learning.promotion_success_ratio)
            || !unit(self.learning.dedup_threshold)
            || !unit(self.learning.workflow_match_threshold)
        {
            return Err(ConfigError::ValidationError(
                "learning ratios and thresholds must be between 0.0 and 1.0".into(),
            ));
        }

        if self.learning.embedding_dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "learning.embedding_dimensions must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            planning_model: None,
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            provider_timeout_secs: default_provider_timeout(),
            analyzer: AnalyzerConfig::default(),
            retry: RetryConfig::default(),
            planning: PlanningConfig::default(),
            learning: LearningConfig::default(),
            execution: ExecutionConfig::default(),
            providers: HashMap::new(),
        }
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
