// Configuration loading: typed YAML config with env overrides for deploys.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub stream_queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            stream_queue_size: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    pub allow_origins: Option<Vec<String>>,
    pub allow_methods: Option<Vec<String>>,
    pub allow_headers: Option<Vec<String>>,
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub models: HashMap<String, LlmModelConfig>,
}

impl LlmConfig {
    /// Resolve a model selector against the configured model table, falling
    /// back to the configured default when the selector is empty or unknown.
    pub fn resolve_model(&self, selector: Option<&str>) -> Option<(String, &LlmModelConfig)> {
        let requested = selector.map(str::trim).filter(|value| !value.is_empty());
        if let Some(name) = requested {
            if let Some(config) = self.models.get(name) {
                return Some((name.to_string(), config));
            }
        }
        let fallback = self.default.trim();
        if fallback.is_empty() {
            return None;
        }
        self.models
            .get(fallback)
            .map(|config| (fallback.to_string(), config))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmModelConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_s: Option<u64>,
    #[serde(default)]
    pub max_output: Option<u32>,
    #[serde(default)]
    pub stream_include_usage: Option<bool>,
    #[serde(default)]
    pub reasoning: Option<bool>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

impl LlmModelConfig {
    /// Reasoning variants run without tools. Either the config marks the
    /// model explicitly or the selector name carries the suffix.
    pub fn is_reasoning_variant(&self, selector: &str) -> bool {
        self.reasoning.unwrap_or(false) || selector.trim().ends_with("-reasoning")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/driftchat.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

pub fn config_path_default() -> String {
    std::env::var("DRIFTCHAT_CONFIG").unwrap_or_else(|_| "config/driftchat.yaml".to_string())
}

pub fn load_config() -> Config {
    load_config_from(&config_path_default())
}

pub fn load_config_from(path: &str) -> Config {
    let path = Path::new(path);
    if !path.exists() {
        return Config::default();
    }
    match fs::read_to_string(path) {
        Ok(text) => match serde_yaml::from_str::<Config>(&text) {
            Ok(config) => config,
            Err(err) => {
                warn!("failed to parse config {}: {err}", path.display());
                Config::default()
            }
        },
        Err(err) => {
            warn!("failed to read config {}: {err}", path.display());
            Config::default()
        }
    }
}
