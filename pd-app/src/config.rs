//! Pindrop configuration loader.
//!
//! TOML file at `~/.pindrop/config.toml` by default, with environment
//! overrides for the model name and API keys.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct PindropConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub learner: LearnerSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub model: String,
    /// SQLite file for preferences, profiles, feedback, and the
    /// decision audit log. Default: `~/.pindrop/pindrop.db`.
    #[serde(default)]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_server_port() -> u16 {
    8374
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_message_threshold_count")]
    pub message_threshold_count: usize,
    #[serde(default = "default_debounce_window_seconds")]
    pub debounce_window_seconds: u64,
}

fn default_window_seconds() -> u64 {
    300
}

fn default_message_threshold_count() -> usize {
    5
}

fn default_debounce_window_seconds() -> u64 {
    60
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            message_threshold_count: default_message_threshold_count(),
            debounce_window_seconds: default_debounce_window_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_context_window_days")]
    pub window_days: i64,
    #[serde(default = "default_context_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_semantic_top_k")]
    pub semantic_top_k: usize,
    #[serde(default = "default_context_ttl_seconds")]
    pub context_ttl_seconds: u64,
    #[serde(default = "default_embedding_max_age_days")]
    pub embedding_max_age_days: i64,
}

fn default_context_window_days() -> i64 {
    7
}

fn default_context_max_messages() -> usize {
    50
}

fn default_semantic_top_k() -> usize {
    5
}

fn default_context_ttl_seconds() -> u64 {
    300
}

fn default_embedding_max_age_days() -> i64 {
    7
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            window_days: default_context_window_days(),
            max_messages: default_context_max_messages(),
            semantic_top_k: default_semantic_top_k(),
            context_ttl_seconds: default_context_ttl_seconds(),
            embedding_max_age_days: default_embedding_max_age_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_model_timeout_seconds")]
    pub model_timeout_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_model_timeout_seconds() -> u64 {
    10
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl_seconds(),
            model_timeout_seconds: default_model_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearnerSection {
    #[serde(default = "default_learner_enabled")]
    pub enabled: bool,
    /// Seven-field cron expression. Default: Sundays at 03:00 UTC.
    #[serde(default = "default_learner_schedule")]
    pub schedule: String,
}

fn default_learner_enabled() -> bool {
    true
}

fn default_learner_schedule() -> String {
    "0 0 3 * * Sun *".to_string()
}

impl Default for LearnerSection {
    fn default() -> Self {
        Self {
            enabled: default_learner_enabled(),
            schedule: default_learner_schedule(),
        }
    }
}

impl PindropConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: PindropConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PINDROP_MODEL") {
            if !v.trim().is_empty() {
                self.general.model = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.openai_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.anthropic_api_key = Some(v);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.monitor.window_seconds == 0 {
            return Err(anyhow::anyhow!("monitor.window_seconds must be > 0"));
        }
        if self.engine.model_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("engine.model_timeout_seconds must be > 0"));
        }
        if self.learner.enabled {
            crate::learner::validate_schedule(&self.learner.schedule)
                .map_err(|e| anyhow::anyhow!("learner.schedule: {e}"))?;
        }
        Ok(())
    }

    pub fn api_key_for_model(&self) -> Option<String> {
        let model = self.general.model.to_ascii_lowercase();
        if model.starts_with("claude-") {
            return self
                .keys
                .anthropic_api_key
                .clone()
                .filter(|s| !s.is_empty());
        }
        self.keys.openai_api_key.clone().filter(|s| !s.is_empty())
    }

    pub fn db_path(&self) -> PathBuf {
        match &self.general.db_path {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_data_dir().join("pindrop.db"),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".pindrop")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> PindropConfig {
        toml::from_str(toml_src).expect("parse config")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(
            r#"
[general]
model = "gpt-4o-mini"
"#,
        );
        assert_eq!(cfg.server.port, 8374);
        assert_eq!(cfg.monitor.window_seconds, 300);
        assert_eq!(cfg.engine.cache_ttl_seconds, 3600);
        assert!(cfg.learner.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = parse(
            r#"
[general]
model = "claude-sonnet-4"

[monitor]
window_seconds = 120
message_threshold_count = 3

[learner]
enabled = false
"#,
        );
        assert_eq!(cfg.monitor.window_seconds, 120);
        assert_eq!(cfg.monitor.message_threshold_count, 3);
        assert!(!cfg.learner.enabled);
    }

    #[test]
    fn validate_rejects_blank_model_and_bad_schedule() {
        let mut cfg = parse(
            r#"
[general]
model = "gpt-4o-mini"
"#,
        );
        cfg.general.model = "  ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = parse(
            r#"
[general]
model = "gpt-4o-mini"
"#,
        );
        cfg.learner.schedule = "bogus".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn api_key_follows_model_family() {
        let mut cfg = parse(
            r#"
[general]
model = "claude-sonnet-4"

[keys]
openai_api_key = "sk-openai"
anthropic_api_key = "sk-ant"
"#,
        );
        assert_eq!(cfg.api_key_for_model().as_deref(), Some("sk-ant"));
        cfg.general.model = "gpt-4o-mini".to_string();
        assert_eq!(cfg.api_key_for_model().as_deref(), Some("sk-openai"));
    }
}
