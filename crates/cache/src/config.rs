//! Cache configuration.
//!
//! Configuration can be created programmatically, loaded from a JSON file, or
//! read from environment variables. It names the descriptor file written by
//! the import step and sizes the bookkeeping pools.

use atlas_sleep_storage::{default_descriptor_path, DESCRIPTOR_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default number of pre-allocated bookkeeping objects per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Configuration for the atlas cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Path of the descriptor file read at start-up
    pub descriptor_path: PathBuf,
    /// Pre-allocated loaded-atlas records
    pub info_pool_capacity: usize,
    /// Pre-allocated sprite lookup tables
    pub sprite_table_pool_capacity: usize,
    /// Force pool checkout tracking on or off; `None` tracks in debug builds only
    pub strict_pools: Option<bool>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            descriptor_path: Self::default_descriptor_path(),
            info_pool_capacity: DEFAULT_POOL_CAPACITY,
            sprite_table_pool_capacity: DEFAULT_POOL_CAPACITY,
            strict_pools: None,
        }
    }
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    descriptor_path: Option<PathBuf>,
    info_pool_capacity: Option<usize>,
    sprite_table_pool_capacity: Option<usize>,
    strict_pools: Option<bool>,
}

impl CacheConfig {
    /// Creates a configuration reading descriptors from `descriptor_path`.
    pub fn new<P: AsRef<Path>>(descriptor_path: P) -> Self {
        Self::default().with_descriptor_path(descriptor_path)
    }

    /// Sets the descriptor file path.
    pub fn with_descriptor_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.descriptor_path = path.as_ref().to_path_buf();
        self
    }

    /// Sets both pool capacities.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.info_pool_capacity = capacity;
        self.sprite_table_pool_capacity = capacity;
        self
    }

    /// Forces pool checkout tracking on or off.
    pub fn with_strict_pools(mut self, strict: bool) -> Self {
        self.strict_pools = Some(strict);
        self
    }

    /// Whether pools track checkouts under this configuration.
    pub fn pools_are_strict(&self) -> bool {
        self.strict_pools.unwrap_or(cfg!(debug_assertions))
    }

    /// Returns the default descriptor location for the current platform.
    ///
    /// Falls back to a relative `data/` directory if no data directory exists.
    pub fn default_descriptor_path() -> PathBuf {
        default_descriptor_path().unwrap_or_else(|_| PathBuf::from("data").join(DESCRIPTOR_FILE_NAME))
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ATLAS_SLEEP_DESCRIPTORS`: descriptor file path
    /// - `ATLAS_SLEEP_POOL_CAPACITY`: capacity of both pools (default: 10)
    /// - `ATLAS_SLEEP_STRICT_POOLS`: `true`/`false`, pool checkout tracking
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ATLAS_SLEEP_DESCRIPTORS") {
            config.descriptor_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ATLAS_SLEEP_POOL_CAPACITY") {
            let capacity = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("ATLAS_SLEEP_POOL_CAPACITY".to_string()))?;
            config = config.with_pool_capacity(capacity);
        }

        if let Ok(val) = std::env::var("ATLAS_SLEEP_STRICT_POOLS") {
            let strict = val
                .parse::<bool>()
                .map_err(|_| ConfigError::InvalidValue("ATLAS_SLEEP_STRICT_POOLS".to_string()))?;
            config.strict_pools = Some(strict);
        }

        Ok(config)
    }

    /// Loads configuration from a JSON file.
    ///
    /// Expected file format (all keys optional):
    /// ```json
    /// {
    ///   "descriptor_path": "/path/to/atlas_descriptors.json",
    ///   "info_pool_capacity": 10,
    ///   "sprite_table_pool_capacity": 10,
    ///   "strict_pools": true
    /// }
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let defaults = Self::default();

        Ok(Self {
            descriptor_path: file.descriptor_path.unwrap_or(defaults.descriptor_path),
            info_pool_capacity: file.info_pool_capacity.unwrap_or(defaults.info_pool_capacity),
            sprite_table_pool_capacity: file
                .sprite_table_pool_capacity
                .unwrap_or(defaults.sprite_table_pool_capacity),
            strict_pools: file.strict_pools,
        })
    }

    /// Saves configuration to a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let file = ConfigFile {
            descriptor_path: Some(self.descriptor_path.clone()),
            info_pool_capacity: Some(self.info_pool_capacity),
            sprite_table_pool_capacity: Some(self.sprite_table_pool_capacity),
            strict_pools: self.strict_pools,
        };
        fs::write(path.as_ref(), serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing the configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The configuration file is not valid JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
