use std::time::Duration;

use thiserror::Error;

use crate::autosave::AutosaveConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub autosave: AutosaveSettings,
    /// Write the example board into an empty database on startup
    pub seed_example_board: bool,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub enum AssetBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: AssetBackend,
    /// Directory for the local asset backend
    pub asset_storage_path: String,
    /// Hard capacity for asset payloads; writes beyond it fail. `None` is unlimited.
    pub quota_bytes: Option<u64>,
    /// Eviction target for asset payloads
    pub budget_bytes: u64,
    /// How often the background eviction runs. Zero disables it.
    pub eviction_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct AutosaveSettings {
    pub debounce_ms: u64,
    pub saved_display_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: AssetBackend::Local,
            asset_storage_path: "./data/assets".to_string(),
            quota_bytes: Some(512 * 1024 * 1024),
            budget_bytes: 256 * 1024 * 1024,
            eviction_interval_seconds: 300,
        }
    }
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 1200,
            saved_display_ms: 1400,
        }
    }
}

impl AutosaveSettings {
    pub fn to_config(&self) -> AutosaveConfig {
        AutosaveConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            saved_display: Duration::from_millis(self.saved_display_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "true" || v == "1")
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let backend = match std::env::var("ASSET_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => AssetBackend::Memory,
            _ => AssetBackend::Local,
        };

        let asset_storage_path = std::env::var("ASSET_STORAGE_PATH")
            .unwrap_or_else(|_| format!("{}/assets", data_dir.trim_end_matches('/')));

        let defaults = StorageConfig::default();
        let quota_bytes = match env_parse::<u64>("ASSET_QUOTA_BYTES") {
            Some(0) => None,
            Some(quota) => Some(quota),
            None => defaults.quota_bytes,
        };
        let budget_bytes = env_parse("ASSET_BUDGET_BYTES").unwrap_or(defaults.budget_bytes);
        let eviction_interval_seconds = env_parse("EVICTION_INTERVAL_SECS")
            .unwrap_or(defaults.eviction_interval_seconds);

        let autosave_defaults = AutosaveSettings::default();
        let autosave = AutosaveSettings {
            debounce_ms: env_parse("AUTOSAVE_DEBOUNCE_MS").unwrap_or(autosave_defaults.debounce_ms),
            saved_display_ms: env_parse("AUTOSAVE_SAVED_DISPLAY_MS")
                .unwrap_or(autosave_defaults.saved_display_ms),
        };

        let max_upload_size = env_parse("MAX_UPLOAD_SIZE").unwrap_or(10 * 1024 * 1024); // 10MB

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig {
                backend,
                asset_storage_path,
                quota_bytes,
                budget_bytes,
                eviction_interval_seconds,
            },
            autosave,
            seed_example_board: env_flag("SEED_EXAMPLE_BOARD").unwrap_or(true),
            test_mode: env_flag("TEST_MODE").unwrap_or(false),
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATA_DIR cannot be empty".to_string(),
            ));
        }

        if let Some(quota) = self.storage.quota_bytes {
            if self.storage.budget_bytes > quota {
                return Err(ConfigError::ValidationError(format!(
                    "ASSET_BUDGET_BYTES ({}) must not exceed ASSET_QUOTA_BYTES ({quota})",
                    self.storage.budget_bytes
                )));
            }
        }

        if self.autosave.debounce_ms == 0 {
            return Err(ConfigError::ValidationError(
                "AUTOSAVE_DEBOUNCE_MS must be positive".to_string(),
            ));
        }

        if matches!(self.storage.backend, AssetBackend::Memory) {
            tracing::warn!("Memory asset backend selected; images are lost on restart.");
        }

        Ok(())
    }

    pub fn eviction_interval(&self) -> Option<Duration> {
        match self.storage.eviction_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
