use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::catalog::image_cache::{
    ImageCacheConfig, DEFAULT_MAX_CACHE_SIZE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS,
};
use crate::core::catalog::manager::{CatalogConfig, DEFAULT_IMAGE_BASE_PATH};
use crate::core::catalog::store::DEFAULT_QUOTA_BYTES;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub images: ImagesConfig,
    pub catalog: CatalogSection,
}

/// Which key/value backend holds the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Nothing survives the process.
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Override the default data directory.
    pub data_dir: Option<PathBuf>,
    /// Byte budget for catalog records.
    pub quota_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub max_cache_size: usize,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub prewarm_after_import: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    pub image_base_path: String,
    pub seed_builtin: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: None,
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            prewarm_after_import: true,
        }
    }
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            image_base_path: DEFAULT_IMAGE_BASE_PATH.to_string(),
            seed_builtin: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from `~/.config/cardpacks/config.toml`.
    /// Returns `Default` if the file is missing or unparseable.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Self {
        match std::fs::read_to_string(config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse config at {}: {e}, using defaults",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(_) => {
                log::debug!(
                    "No config file at {}, using defaults",
                    config_path.display()
                );
                Self::default()
            }
        }
    }

    /// Resolved data directory (override or XDG default).
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("cardpacks"))
                .unwrap_or_else(|| PathBuf::from("data"))
        })
    }

    /// Directory of the file key/value backend.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir().join("store")
    }

    /// Root of the file blob backend.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir().join("blobs")
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            image_base_path: self.catalog.image_base_path.clone(),
            seed_builtin: self.catalog.seed_builtin,
            quota_bytes: self.storage.quota_bytes,
            prewarm_after_import: self.images.prewarm_after_import,
        }
    }

    pub fn image_cache_config(&self) -> ImageCacheConfig {
        ImageCacheConfig::default()
            .with_max_cache_size(self.images.max_cache_size)
            .with_wait_timeout(Duration::from_millis(self.images.wait_timeout_ms))
            .with_poll_interval(Duration::from_millis(self.images.poll_interval_ms))
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("cardpacks").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}
