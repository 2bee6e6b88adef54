//! `relay_config.toml` schema, loading and validation

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Root
// ============================================================================

/// Full service configuration. Every section and field is optional in the
/// TOML file and falls back to `defaults`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub vision: VisionConfig,
    pub generator: GeneratorConfig,
    pub queue: QueueConfig,
    pub pacing: PacingConfig,
    pub events: EventsConfig,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::BIND_ADDRESS.to_string(),
            cors_origins: Vec::new(),
            max_upload_bytes: defaults::MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub captures_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DATA_DIR),
            captures_dir: PathBuf::from(defaults::CAPTURES_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Ollama server root
    pub base_url: String,
    pub model: String,
    pub prompt: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::VISION_BASE_URL.to_string(),
            model: defaults::VISION_MODEL.to_string(),
            prompt: defaults::VISION_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Text-to-image endpoint; empty disables generation
    pub endpoint: String,
    /// Bearer key; prefer `RELAY_GENERATOR_API_KEY`
    pub api_key: String,
    pub output_extension: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            output_extension: defaults::GENERATOR_OUTPUT_EXTENSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Run the background drain scheduler
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: defaults::QUEUE_POLL_INTERVAL_SECS,
            call_timeout_secs: defaults::CALL_TIMEOUT_SECS,
        }
    }
}

impl QueueConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub description_floor_ms: u64,
    pub generation_floor_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            description_floor_ms: defaults::DESCRIPTION_FLOOR_MS,
            generation_floor_ms: defaults::GENERATION_FLOOR_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl RelayConfig {
    /// Load configuration using the standard search order:
    /// 1. `$RELAY_CONFIG` environment variable
    /// 2. `./relay_config.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// Unreadable or malformed files are skipped with a warning. Values are
    /// not validated here; call `validate()` once CLI overrides are applied.
    pub fn load() -> Self {
        let mut config = Self::discover();
        config.apply_api_key_override(std::env::var(defaults::GENERATOR_API_KEY_ENV).ok());
        config
    }

    fn discover() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded relay config from {}", defaults::CONFIG_ENV);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded relay config from ./{}", defaults::CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// A non-empty key from the environment replaces the file's key.
    pub fn apply_api_key_override(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.generator.api_key = key;
        }
    }

    /// Reject values the service cannot run with.
    ///
    /// A missing generator endpoint only warns: the queue processor still
    /// works and `start-pipeline` reports the generator as not configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server.bind_address.trim().is_empty() {
            errors.push("server.bind_address must not be empty".to_string());
        }
        if self.server.max_upload_bytes == 0 {
            errors.push("server.max_upload_bytes must be > 0".to_string());
        }
        if self.vision.base_url.trim().is_empty() {
            errors.push("vision.base_url must not be empty".to_string());
        }
        if self.vision.model.trim().is_empty() {
            errors.push("vision.model must not be empty".to_string());
        }
        if self.queue.poll_interval_secs == 0 {
            errors.push("queue.poll_interval_secs must be > 0".to_string());
        }
        if self.queue.call_timeout_secs == 0 {
            errors.push("queue.call_timeout_secs must be > 0".to_string());
        }
        if self.events.channel_capacity == 0 {
            errors.push("events.channel_capacity must be > 0".to_string());
        }
        if self.generator.output_extension.trim_start_matches('.').is_empty() {
            errors.push("generator.output_extension must not be empty".to_string());
        }

        if self.generator.endpoint.trim().is_empty() {
            warn!("generator.endpoint not set: start-pipeline requests will fail at the generation stage");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error ({0:?}): {1}")]
    Io(PathBuf, std::io::Error),
    #[error("config parse error ({0:?}): {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}
