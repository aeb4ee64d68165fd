use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub eval: EvalConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Base URL of the retrieval service exposing the eval job API.
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvalConfig {
    #[serde(default)]
    pub use_multi: bool,
    #[serde(default = "default_final_k")]
    pub final_k: i64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            use_multi: false,
            final_k: default_final_k(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_final_k() -> i64 {
    10
}
fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            capacity: default_capacity(),
        }
    }
}

fn default_history_path() -> PathBuf {
    PathBuf::from("./data/eval_history.json")
}
fn default_capacity() -> usize {
    20
}

impl Config {
    /// Minimal config for commands that only touch local history and never
    /// contact the service.
    pub fn minimal() -> Self {
        Self {
            service: ServiceConfig {
                base_url: "http://127.0.0.1:7391".to_string(),
                timeout_secs: default_timeout_secs(),
                max_retries: default_max_retries(),
            },
            eval: EvalConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.service.base_url.trim().is_empty() {
        anyhow::bail!("service.base_url must not be empty");
    }
    if !config.service.base_url.starts_with("http://")
        && !config.service.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "service.base_url must start with http:// or https://, got '{}'",
            config.service.base_url
        );
    }

    if config.eval.final_k < 1 {
        anyhow::bail!("eval.final_k must be >= 1");
    }
    if config.eval.poll_interval_ms == 0 {
        anyhow::bail!("eval.poll_interval_ms must be > 0");
    }

    if config.history.capacity == 0 {
        anyhow::bail!("history.capacity must be >= 1");
    }

    Ok(config)
}
