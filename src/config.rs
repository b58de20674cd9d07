use crate::utils::{expand_tilde, get_data_path};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub host: String,
    pub token: String,
    pub count_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "https://agent.shatool.dad".to_string(),
            token: String::new(),
            count_timeout_secs: 5,
            fetch_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: "gpt-4.1-mini".to_string(),
            max_tokens: 5000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationSettings {
    pub dir: String,
    pub items_dir: String,
    pub error_backoff_secs: u64,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            dir: "~/.msgpilot/automations".to_string(),
            items_dir: "~/.msgpilot/items".to_string(),
            error_backoff_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub automation: AutomationSettings,
    /// Prompt type -> template text, overriding the built-in templates.
    pub prompts: HashMap<String, String>,
}

impl Config {
    pub fn automation_dir(&self) -> PathBuf {
        expand_tilde(&self.automation.dir)
    }

    pub fn items_dir(&self) -> PathBuf {
        expand_tilde(&self.automation.items_dir)
    }

    pub fn agent_token(&self) -> Option<String> {
        Some(self.agent.token.clone()).filter(|t| !t.is_empty())
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_data_path()?.join("config.json"))
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };

    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, text)?;
    Ok(())
}

/// Environment variables win over the file so deployments can inject secrets.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get("AGENT_HOST") {
        config.agent.host = host;
    }
    if let Some(token) = get("API_TOKEN") {
        config.agent.token = token;
    }
    if let Some(key) = get("OPENAI_API_KEY") {
        config.llm.api_key = key;
    }
    if let Some(model) = get("GPT_MODEL") {
        config.llm.model = model;
    }
    if let Some(raw) = get("GPT_MAX_TOKENS") {
        match raw.trim().parse() {
            Ok(v) => config.llm.max_tokens = v,
            Err(_) => warn!("ignoring GPT_MAX_TOKENS={raw}: not an integer"),
        }
    }
    if let Some(raw) = get("GPT_TEMPERATURE") {
        match raw.trim().parse() {
            Ok(v) => config.llm.temperature = v,
            Err(_) => warn!("ignoring GPT_TEMPERATURE={raw}: not a number"),
        }
    }
}
