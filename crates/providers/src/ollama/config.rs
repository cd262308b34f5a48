use anyhow::{bail, Context};
use directories::BaseDirs;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";
const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileFileConfig {
    pub name: String,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OllamaFileConfig {
    pub default_model: Option<String>,
    pub models: Option<Vec<ProfileFileConfig>>,
}

/// One named endpoint: everything `generate` needs for a single attempt.
/// `set_model` swaps the whole value, never individual fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelProfile {
    pub name: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Static description of the known endpoints. Loaded once; read-only
/// afterward.
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub models: Vec<ModelProfile>,
    pub default_model: String,
}

impl OllamaConfig {
    /// Single local endpoint on the stock Ollama port.
    pub fn localhost() -> Self {
        OllamaConfig {
            models: vec![ModelProfile {
                name: DEFAULT_MODEL.to_string(),
                base_url: DEFAULT_BASE_URL.to_string(),
                timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
                max_retries: DEFAULT_MAX_RETRIES,
            }],
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read model config: {}", path.display()))?;
        let file_cfg: OllamaFileConfig =
            toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Self::from_file_config(file_cfg)
    }

    fn from_file_config(file_cfg: OllamaFileConfig) -> anyhow::Result<Self> {
        let entries = file_cfg.models.unwrap_or_default();
        if entries.is_empty() {
            bail!("model config lists no models");
        }
        let mut models = Vec::with_capacity(entries.len());
        for entry in entries {
            let base_url = entry
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
            Url::parse(&base_url)
                .with_context(|| format!("model {}: invalid base_url {base_url}", entry.name))?;
            let timeout_ms = entry.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
            if timeout_ms == 0 {
                bail!("model {}: timeout_ms must be > 0", entry.name);
            }
            models.push(ModelProfile {
                name: entry.name,
                base_url,
                timeout: Duration::from_millis(timeout_ms),
                max_retries: entry.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1),
            });
        }
        let default_model = file_cfg
            .default_model
            .unwrap_or_else(|| models[0].name.clone());
        if !models.iter().any(|m| m.name == default_model) {
            bail!("default_model {default_model} is not among the configured models");
        }
        Ok(OllamaConfig {
            models,
            default_model,
        })
    }

    /// Config file if present and readable, localhost defaults otherwise.
    /// Degrading instead of failing keeps `list_models` a safe UI path.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::localhost();
        };
        if !path.exists() {
            return Self::localhost();
        }
        match Self::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(target: "providers::ollama", "unusable model config, falling back to localhost: {e:#}");
                Self::localhost()
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".prompt-optimizer").join("models.toml")
        } else {
            base.config_dir().join("prompt-optimizer").join("models.toml")
        };
        Some(p)
    }
}
