//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`RagConfig`] struct, which holds the configuration parameters,
//! and a [`load_config`] function to load the configuration from a YAML file.
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration.
//!
//! # Examples
//!
//! ```yaml
//! api_base: "https://api.openai.com/v1"
//! model: "gpt-3.5-turbo"
//! index_path: "vector_db"
//! chunk_size: 1000
//! chunk_overlap: 200
//! ```
//!
//! ```no_run
//! use awful_rag::config::{RagConfig, load_config};
//!
//! let config: RagConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embeddings::DEFAULT_EMBEDDING_MODEL;
use crate::error::{RagError, Result};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RagConfig {
    /// The API key used to authenticate requests. Falls back to `OPENAI_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// The base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// The name of the model used for generating answers.
    pub model: String,

    /// Directory holding the persisted vector index.
    pub index_path: PathBuf,

    /// Hugging Face model id of the sentence embedding model.
    pub embedding_model: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    // Sampling
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,

    /// Timeout for a single model request.
    pub request_timeout_secs: u64,

    /// Name of a template under `<config_dir>/templates/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            index_path: PathBuf::from("vector_db"),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_tokens: 800,
            temperature: 0.7,
            top_p: 0.9,
            request_timeout_secs: 60,
            template: None,
        }
    }
}

impl RagConfig {
    /// The configured key, or `OPENAI_API_KEY` when none is configured.
    /// Blank values count as missing.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_tokens == 0 {
            return Err(RagError::InvalidConfig("max_tokens must be positive".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RagError::InvalidConfig(format!(
                "temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(RagError::InvalidConfig(format!(
                "top_p {} is outside 0.0..=1.0",
                self.top_p
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(RagError::InvalidConfig(
                "request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Default config file location: `<config_dir>/config.yaml`.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads and validates the configuration from a YAML file.
///
/// # Errors
/// - [`RagError::Io`] if the file cannot be read.
/// - [`RagError::InvalidConfig`] if the YAML does not parse or fails validation.
pub fn load_config(file: impl AsRef<Path>) -> Result<RagConfig> {
    let file = file.as_ref();
    debug!("Loading config: {}", file.display());

    let content = fs::read_to_string(file)?;
    let config: RagConfig = if content.trim().is_empty() {
        RagConfig::default()
    } else {
        serde_yaml::from_str(&content)
            .map_err(|e| RagError::InvalidConfig(format!("{}: {e}", file.display())))?
    };
    config.validate()?;
    Ok(config)
}

/// Write `config` as YAML, creating parent directories as needed.
pub fn save_config(config: &RagConfig, file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| RagError::InvalidConfig(format!("cannot serialize config: {e}")))?;
    fs::write(file, yaml)?;
    info!("Wrote config to {}", file.display());
    Ok(())
}
