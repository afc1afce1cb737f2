//! Application configuration.
//!
//! Layering, highest precedence first: CLI/env overrides, then a config
//! file overlay (the CLI-specified path or a local `docpilot.json`), then
//! the profile config (`~/.docpilot/docpilot.json`), then built-in
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS,
    MODEL_VARIANTS, SOURCE_STEP_NAME,
};

// =============================================================================
// File config
// =============================================================================

/// API section of the JSON config file
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ApiFileConfig {
    /// Chat service base URL
    pub endpoint: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Chat section of the JSON config file
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ChatFileConfig {
    /// Model variant to request
    pub model: Option<String>,
    /// Run-log step that carries retrieved sources
    pub source_step: Option<String>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub api: Option<ApiFileConfig>,
    pub chat: Option<ChatFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
            tracing::warn!(
                fields = %keys.join(", "),
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(api) = other.api {
            let current = self.api.get_or_insert_with(ApiFileConfig::default);
            if api.endpoint.is_some() {
                current.endpoint = api.endpoint;
            }
            if api.timeout_secs.is_some() {
                current.timeout_secs = api.timeout_secs;
            }
        }
        if let Some(chat) = other.chat {
            let current = self.chat.get_or_insert_with(ChatFileConfig::default);
            if chat.model.is_some() {
                current.model = chat.model;
            }
            if chat.source_step.is_some() {
                current.source_step = chat.source_step;
            }
        }
    }
}

// =============================================================================
// Resolved config
// =============================================================================

/// Resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub model: String,
    pub source_step: String,
}

impl AppConfig {
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Profile config (~/.docpilot/docpilot.json) - skip if not exists
        if let Some(profile_path) = profile_config_path()
            && profile_path.exists()
        {
            let profile = FileConfig::load_from_file(&profile_path)?;
            profile.warn_unknown_fields();
            file_config.merge(profile);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. CLI-specified path OR local docpilot.json
        let overlay_path = if let Some(ref path) = cli.config {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Some(path.clone())
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay = FileConfig::load_from_file(&path)?;
            overlay.warn_unknown_fields();
            file_config.merge(overlay);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let file_api = file_config.api.unwrap_or_default();
        let file_chat = file_config.chat.unwrap_or_default();

        // Layer: defaults -> file config -> CLI/env overrides
        let endpoint = cli
            .endpoint
            .clone()
            .or(file_api.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let timeout_secs = cli
            .timeout_secs
            .or(file_api.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let model = cli
            .model
            .clone()
            .or(file_chat.model)
            .unwrap_or_else(default_model);

        let source_step = file_chat
            .source_step
            .unwrap_or_else(|| SOURCE_STEP_NAME.to_string());

        Ok(Self {
            endpoint,
            timeout_secs,
            model,
            source_step,
        })
    }
}

/// Pick a model variant at random when none is configured, spreading
/// unconfigured sessions across the service's backends.
fn default_model() -> String {
    MODEL_VARIANTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}

fn profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
