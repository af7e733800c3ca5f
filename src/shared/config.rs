use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::shared::models::constants::{DEFAULT_KERNEL, DEFAULT_STOP_KEYWORD};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NbAgentConfig {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_intent_model")]
    pub intent_model: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Tunables for the orchestration core.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    /// How many trailing messages the intent resolver sees.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_generation_attempts")]
    pub max_generation_attempts: u32,
    #[serde(default = "default_stop_keyword")]
    pub stop_keyword: String,
    #[serde(default = "default_kernel")]
    pub default_kernel: String,
    #[serde(default = "default_intent_model")]
    pub intent_model: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: default_inference_url(),
            api_key: None,
            intent_model: default_intent_model(),
            generation_model: default_generation_model(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_generation_attempts: default_max_generation_attempts(),
            stop_keyword: default_stop_keyword(),
            default_kernel: default_kernel(),
            intent_model: default_intent_model(),
            generation_model: default_generation_model(),
        }
    }
}

impl NbAgentConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let config: NbAgentConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Failed to parse config JSON at {}: {}", path.display(), e))?;
        config.normalized()
    }

    /// Loads the file when one is given, otherwise starts from defaults, then
    /// applies environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => Self::load_from_path(&expand_path(raw.to_string()))?,
            None => NbAgentConfig::default(),
        };

        if let Ok(key) = std::env::var("NBAGENT_INFERENCE_API_KEY") {
            if !key.trim().is_empty() {
                config.inference.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var("NBAGENT_INFERENCE_URL") {
            if !url.trim().is_empty() {
                config.inference.url = url.trim().trim_end_matches('/').to_string();
            }
        }

        config.normalized()
    }

    fn normalized(mut self) -> Result<Self> {
        self.inference.url = self.inference.url.trim().trim_end_matches('/').to_string();
        if self.inference.url.is_empty() {
            self.inference.url = default_inference_url();
        }

        self.inference.intent_model = non_empty_or(&self.inference.intent_model, default_intent_model);
        self.inference.generation_model =
            non_empty_or(&self.inference.generation_model, default_generation_model);

        if self.inference.timeout_secs == 0 {
            return Err(anyhow!("inference.timeout_secs must be greater than zero"));
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(anyhow!(
                "inference.temperature must be between 0.0 and 2.0, got {}",
                self.inference.temperature
            ));
        }

        if self.agent.history_window < 2 {
            return Err(anyhow!(
                "agent.history_window must be at least 2, got {}",
                self.agent.history_window
            ));
        }
        if self.agent.max_generation_attempts == 0 {
            return Err(anyhow!("agent.max_generation_attempts must be at least 1"));
        }

        self.agent.stop_keyword = non_empty_or(&self.agent.stop_keyword, default_stop_keyword);
        self.agent.default_kernel = non_empty_or(&self.agent.default_kernel, default_kernel);

        // The agent always talks to the models named in the inference section
        self.agent.intent_model = self.inference.intent_model.clone();
        self.agent.generation_model = self.inference.generation_model.clone();

        Ok(self)
    }
}

fn non_empty_or(value: &str, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_inference_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_intent_model() -> String {
    "deepseek-chat".to_string()
}

fn default_generation_model() -> String {
    "deepseek-coder".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_history_window() -> usize {
    8
}

fn default_max_generation_attempts() -> u32 {
    3
}

fn default_stop_keyword() -> String {
    DEFAULT_STOP_KEYWORD.to_string()
}

fn default_kernel() -> String {
    DEFAULT_KERNEL.to_string()
}

fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}
