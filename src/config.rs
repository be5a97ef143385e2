//! Service configuration: optional TOML file plus environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::llm::{DEFAULT_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATION_MODEL};

/// Optional configuration file, looked up in the working directory.
const CONFIG_FILE: &str = "ragd.toml";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TOP_K: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is required but not set")]
    MissingApiKey,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// File-backed settings; every field is optional and the environment
/// wins over the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    port: Option<u16>,
    data_dir: Option<String>,
    api_base_url: Option<String>,
    embedding_model: Option<String>,
    embedding_dimensions: Option<usize>,
    generation_model: Option<String>,
    top_k: Option<usize>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Absent until an operation that talks to the collaborators needs it.
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub generation_model: String,
    pub top_k: usize,
}

impl Config {
    /// Load configuration: `ragd.toml` when present, then environment
    /// variables on top.
    pub fn load() -> Result<Self, ConfigError> {
        let file = Self::read_file(Path::new(CONFIG_FILE))?;

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue { key: "PORT", value: raw })?,
            Err(_) => file.port.unwrap_or(DEFAULT_PORT),
        };

        let data_dir = env::var("RAG_DATA_DIR")
            .ok()
            .or(file.data_dir)
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let embedding_dimensions = match env::var("EMBEDDING_DIMENSIONS") {
            Ok(raw) => raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "EMBEDDING_DIMENSIONS",
                value: raw,
            })?,
            Err(_) => file.embedding_dimensions.unwrap_or(DEFAULT_DIMENSIONS),
        };

        let top_k = match env::var("RAG_TOP_K") {
            Ok(raw) => raw
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue { key: "RAG_TOP_K", value: raw })?,
            Err(_) => file.top_k.unwrap_or(DEFAULT_TOP_K),
        };

        Ok(Self {
            port,
            data_dir: PathBuf::from(data_dir),
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            api_base_url: env::var("OPENAI_BASE_URL")
                .ok()
                .or(file.api_base_url)
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .ok()
                .or(file.embedding_model)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions,
            generation_model: env::var("GENERATION_MODEL")
                .ok()
                .or(file.generation_model)
                .unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
            top_k,
        })
    }

    /// The credential is demanded only by operations that talk to the
    /// collaborators; absence is fatal for that operation, not for load.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    /// Base path of the persisted index artifact pair.
    pub fn index_base_path(&self) -> PathBuf {
        self.data_dir.join("vector_store")
    }

    /// Path of the ingestion manifest document.
    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join("kb_manifest.json")
    }

    fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
        if !path.exists() {
            return Ok(ConfigFile::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
