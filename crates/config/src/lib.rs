//! Configuration loading, validation, and management for roundclaw.
//!
//! Loads configuration from `~/.roundclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use roundclaw_core::Thinking;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.roundclaw/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Workspace root holding `sessions/`, `refs/`, `prompts/` and `memory/`
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Model id sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max output tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Ask the model for extended reasoning
    #[serde(default)]
    pub thinking: bool,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub context: ContextSettings,

    #[serde(default)]
    pub session: SessionSettings,
}

fn default_workspace() -> PathBuf {
    AppConfig::config_dir().join("workspace")
}
fn default_model() -> String {
    "kimi-k2.5".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Hard upper bound on model calls per turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    30
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

/// Token budget and compaction knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// The context window the budget ratios are fractions of
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,

    /// Above `window_tokens * compact_ratio`, oversized tool results are offloaded
    #[serde(default = "default_compact_ratio")]
    pub compact_ratio: f64,

    /// Above `window_tokens * summarize_ratio` (after compaction), history is summarized
    #[serde(default = "default_summarize_ratio")]
    pub summarize_ratio: f64,

    /// Tool results longer than this many characters are eligible for compression
    #[serde(default = "default_compress_threshold_chars")]
    pub compress_threshold_chars: usize,

    /// Max tool results compressed per maintenance pass
    #[serde(default = "default_compress_batch")]
    pub compress_batch: usize,

    /// Messages kept verbatim when summarizing
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Context logs shorter than this are never summarized
    #[serde(default = "default_min_summarize_messages")]
    pub min_summarize_messages: usize,
}

fn default_window_tokens() -> usize {
    128_000
}
fn default_compact_ratio() -> f64 {
    0.8
}
fn default_summarize_ratio() -> f64 {
    0.6
}
fn default_compress_threshold_chars() -> usize {
    5000
}
fn default_compress_batch() -> usize {
    16
}
fn default_keep_recent() -> usize {
    5
}
fn default_min_summarize_messages() -> usize {
    10
}

impl ContextSettings {
    pub fn compact_threshold_tokens(&self) -> usize {
        (self.window_tokens as f64 * self.compact_ratio) as usize
    }

    pub fn summarize_threshold_tokens(&self) -> usize {
        (self.window_tokens as f64 * self.summarize_ratio) as usize
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
            compact_ratio: default_compact_ratio(),
            summarize_ratio: default_summarize_ratio(),
            compress_threshold_chars: default_compress_threshold_chars(),
            compress_batch: default_compress_batch(),
            keep_recent: default_keep_recent(),
            min_summarize_messages: default_min_summarize_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Write every AOF append straight to disk instead of buffering it
    #[serde(default = "default_true")]
    pub aof_write_through: bool,

    /// Interval of the background AOF flusher when buffering
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// How long shutdown waits for the final flush
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_flush_interval_secs() -> u64 {
    10
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            aof_write_through: default_true(),
            flush_interval_secs: default_flush_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.roundclaw/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `ROUNDCLAW_WORKSPACE`
    /// - `ROUNDCLAW_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    /// Apply `ROUNDCLAW_*` overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(workspace) = lookup("ROUNDCLAW_WORKSPACE").filter(|v| !v.is_empty()) {
            self.workspace = PathBuf::from(workspace);
        }
        if let Some(model) = lookup("ROUNDCLAW_MODEL").filter(|v| !v.is_empty()) {
            self.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".roundclaw")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.workspace.join("sessions")
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.workspace.join("refs")
    }

    /// The extended reasoning toggle to put on requests.
    pub fn thinking(&self) -> Option<Thinking> {
        self.thinking.then_some(Thinking::Enabled)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError("agent.max_rounds must be >= 1".into()));
        }

        for (name, ratio) in [
            ("context.compact_ratio", self.context.compact_ratio),
            ("context.summarize_ratio", self.context.summarize_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be in (0.0, 1.0], got {ratio}"
                )));
            }
        }

        if self.context.keep_recent == 0 {
            return Err(ConfigError::ValidationError("context.keep_recent must be >= 1".into()));
        }

        if self.context.window_tokens == 0 {
            return Err(ConfigError::ValidationError("context.window_tokens must be > 0".into()));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `roundclaw config --default`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            thinking: false,
            agent: AgentSettings::default(),
            context: ContextSettings::default(),
            session: SessionSettings::default(),
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

impl From<ConfigError> for roundclaw_core::Error {
    fn from(e: ConfigError) -> Self {
        roundclaw_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_rounds, 30);
        assert_eq!(config.context.keep_recent, 5);
        assert_eq!(config.context.compress_threshold_chars, 5000);
        assert!(config.session.aof_write_through);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.context.window_tokens, config.context.window_tokens);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "gpt-4o-mini"

[context]
window_tokens = 32000
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.context.window_tokens, 32000);
        assert_eq!(config.context.compact_ratio, 0.8);
        assert_eq!(config.agent.max_rounds, 30);
        assert_eq!(config.context.compact_threshold_tokens(), 25600);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_ratio_rejected() {
        let mut config = AppConfig::default();
        config.context.summarize_ratio = 0.0;
        assert!(config.validate().is_err());

        config.context.summarize_ratio = 1.5;
        assert!(config.validate().is_err());

        config.context.summarize_ratio = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_rounds_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_rounds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_rounds"));
    }

    #[test]
    fn parse_error_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "model = [").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().model, "kimi-k2.5");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            "ROUNDCLAW_WORKSPACE" => Some("/srv/claw".into()),
            "ROUNDCLAW_MODEL" => Some("moonshot-v1".into()),
            _ => None,
        });
        assert_eq!(config.workspace, PathBuf::from("/srv/claw"));
        assert_eq!(config.sessions_dir(), PathBuf::from("/srv/claw/sessions"));
        assert_eq!(config.model, "moonshot-v1");
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("kimi-k2.5"));
        assert!(toml_str.contains("[context]"));
        assert!(toml_str.contains("max_rounds = 30"));
    }
}
