use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Base URL up to and including the API version, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta`.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Optional API key stored in config.toml (falls back to env var PAGEPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Vision + function-calling model driving the browser loop.
    pub vision: Option<RoleEntry>,
    /// Model used by the tool-router chat path.
    pub tools: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_output_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
    /// Settle time after navigation-like actions (navigate, click, submit).
    #[serde(default = "default_navigation_settle_ms")]
    pub navigation_settle_ms: u64,
    #[serde(default = "default_action_settle_ms")]
    pub action_settle_ms: u64,
    /// Pause between the focusing click and typing in a type-at-coordinates script.
    #[serde(default = "default_focus_delay_ms")]
    pub focus_delay_ms: u64,
    #[serde(default = "default_wait_action_secs")]
    pub wait_action_secs: u64,
    #[serde(default = "default_true")]
    pub record_transcript: bool,
    #[serde(default)]
    pub transcript_dir: Option<PathBuf>,
}

fn default_max_turns() -> u32 {
    30
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_navigation_settle_ms() -> u64 {
    2500
}
fn default_action_settle_ms() -> u64 {
    500
}
fn default_focus_delay_ms() -> u64 {
    300
}
fn default_wait_action_secs() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            model_timeout_secs: default_model_timeout_secs(),
            navigation_settle_ms: default_navigation_settle_ms(),
            action_settle_ms: default_action_settle_ms(),
            focus_delay_ms: default_focus_delay_ms(),
            wait_action_secs: default_wait_action_secs(),
            record_transcript: true,
            transcript_dir: None,
        }
    }
}

impl AgentConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Endpoint of the browser-side bridge that relays messages to the action backend.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:17345/message".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1500
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SafetyConfig {
    /// Appended to the built-in sensitive page patterns.
    #[serde(default)]
    pub extra_sensitive_patterns: Vec<String>,
    /// Model function names that always need confirmation, on top of `key_combination`.
    #[serde(default)]
    pub always_confirm: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bound on one JSON-RPC round trip with the server.
    #[serde(default = "default_mcp_timeout")]
    pub request_timeout_secs: u64,
}

impl McpServerEntry {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_mcp_timeout() -> u64 {
    30
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> PilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> PilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[llm]
active_provider = "gemini"

[llm.providers.gemini]
display_name = "Gemini"
api_base = "https://generativelanguage.googleapis.com/v1beta"
model = "gemini-2.5-computer-use-preview"
"#;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.agent.max_turns, 30);
        assert_eq!(config.agent.model_timeout_secs, 60);
        assert_eq!(config.agent.navigation_settle_ms, 2500);
        assert_eq!(config.agent.action_settle_ms, 500);
        assert_eq!(config.backend.max_retries, 3);
        assert_eq!(config.backend.retry_delay_ms, 1500);
        assert!(config.mcp.servers.is_empty());
        let provider = &config.llm.providers["gemini"];
        assert_eq!(provider.temperature, 0.1);
        assert!(provider.api_key.is_none());
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.agent.max_turns = 12;
        config.safety.extra_sensitive_patterns.push("wire transfer".into());

        save_config(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.agent.max_turns, 12);
        assert_eq!(loaded.safety.extra_sensitive_patterns, vec!["wire transfer"]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, PilotError::Io(_)));
    }
}
