//! Configuration for the docflow gateway
//!
//! Values resolve in three layers: built-in defaults, an optional TOML file
//! named by `DOCFLOW_CONFIG`, then environment variables. Every external
//! service URL has an internal-network fallback so the gateway starts with
//! no configuration at all.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::PathMapping;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DocflowConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Filesystem roots
    pub storage: StorageConfig,
    /// External service base URLs
    pub services: ServicesConfig,
    /// Container/host path translation table
    pub paths: PathsConfig,
    /// Poll policies per job kind
    pub polling: PollingConfig,
    /// Public URLs handed to the browser and the document server
    pub editor: EditorConfig,
}

impl DocflowConfig {
    /// Load defaults, then `DOCFLOW_CONFIG` (if set), then environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("DOCFLOW_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("DOCFLOW_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("DOCFLOW_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(root) = get("DOCFLOW_PUBLIC_ROOT") {
            self.storage.public_root = PathBuf::from(root);
        }
        if let Some(root) = get("DOCFLOW_DATA_ROOT") {
            self.storage.data_root = PathBuf::from(root);
        }
        if let Some(user) = get("DOCFLOW_DEFAULT_USER") {
            self.storage.default_user = user;
        }

        if let Some(url) = get("PYTHON_OCR_SERVICE_URL") {
            self.services.ocr_url = url;
        }
        if let Some(url) = get("DEEPSEEK_SERVICE_URL") {
            self.services.large_model_url = url;
        }
        if let Some(url) = get("GENERATE_API_URL") {
            self.services.schema_url = url;
        }
        if let Some(url) = get("EXTRACT_API_URL") {
            self.services.extract_url = url;
        }
        if let Some(url) = get("PYTHON_PIPELINE_SERVICE_URL") {
            self.services.pipeline_url = url;
        }
        if let Some(url) = get("PYTHON_DB_SERVICE_URL") {
            self.services.db_url = url;
        }

        if let Some(base) = get("BASE_URL").or_else(|| get("NEXT_PUBLIC_BASE_URL")) {
            self.editor.public_base = base;
        }
        if let Some(base) = get("DS_BASE_URL").or_else(|| get("NEXT_PUBLIC_DS_BASE_URL")) {
            self.editor.ds_base = Some(base);
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Filesystem roots as seen from inside the gateway's own mount namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root holding `upload/` and `save/`
    pub public_root: PathBuf,
    /// Root holding `generater_json/`, `extractenti_json/` and `output/`
    pub data_root: PathBuf,
    /// User id used when a request carries none
    pub default_user: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_root: PathBuf::from("/app/public"),
            data_root: PathBuf::from("/app/data"),
            default_user: "123".to_string(),
        }
    }
}

/// External service base URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Small-model OCR / report service
    pub ocr_url: String,
    /// Large-model (DeepSeek) OCR service
    pub large_model_url: String,
    /// Schema generation service
    pub schema_url: String,
    /// Entity extraction service
    pub extract_url: String,
    /// Parsing pipeline (run_check, statistics, status)
    pub pipeline_url: String,
    /// Database import service
    pub db_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            ocr_url: "http://localhost:11111".to_string(),
            large_model_url: "http://host.docker.internal:22222".to_string(),
            schema_url: "http://host.docker.internal:31456".to_string(),
            extract_url: "http://host.docker.internal:16326".to_string(),
            pipeline_url: "http://192.168.3.10:8005".to_string(),
            db_url: "http://192.168.3.10:8006".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Container/host path translation table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub mappings: Vec<PathMapping>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            mappings: vec![
                PathMapping::new("/app/data", "/root/zzp/langextract-main/zzpextract"),
                PathMapping::new("/app/public/upload", "/home/cqj/my-doc-system-uploads/upload"),
                PathMapping::new("/app/public/save", "/home/cqj/my-doc-system-uploads/save"),
            ],
        }
    }
}

/// Poll policy for one job kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollPolicyConfig {
    /// Attempts before the job is declared timed out
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub interval_ms: u64,
}

impl PollPolicyConfig {
    pub const fn new(max_attempts: u32, interval_ms: u64) -> Self {
        Self {
            max_attempts,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Poll policies for every watched job kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub ocr: PollPolicyConfig,
    pub schema: PollPolicyConfig,
    pub extract: PollPolicyConfig,
    /// Entity-extraction status endpoint
    pub entity: PollPolicyConfig,
    pub pipeline: PollPolicyConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            ocr: PollPolicyConfig::new(60, 3000),
            schema: PollPolicyConfig::new(60, 3000),
            extract: PollPolicyConfig::new(60, 5000),
            entity: PollPolicyConfig::new(60, 2000),
            pipeline: PollPolicyConfig::new(120, 2000),
        }
    }
}

/// Public URLs handed to the browser and to the document server
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EditorConfig {
    /// Base URL of this gateway as seen by the browser (may be empty)
    pub public_base: String,
    /// Base URL of this gateway as seen by the document server
    pub ds_base: Option<String>,
}

impl EditorConfig {
    /// Document-server base, falling back to the public base
    pub fn ds_base(&self) -> &str {
        self.ds_base.as_deref().unwrap_or(&self.public_base)
    }
}
