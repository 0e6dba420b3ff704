//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::SplittingRule;
use crate::query::UnresolvedFilterPolicy;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node store and dataset location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_dataset")]
    pub dataset: String,

    /// Fixed node store size; the store never grows past it
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,

    /// How long a build waits on another writer of the same store
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tracebin").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tracebin_data".to_string())
}

fn default_dataset() -> String {
    "default".to_string()
}

fn default_capacity_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_busy_timeout_ms() -> u64 {
    10 * 60 * 1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dataset: default_dataset(),
            capacity_bytes: default_capacity_bytes(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StorageConfig {
    /// Directory holding one dataset's manifests and node store
    pub fn dataset_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.dataset)
    }
}

/// Hierarchy layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// One hierarchy per track
    #[default]
    PerTrack,
    /// A single time × track hierarchy over all tracks
    TwoDimensional,
}

impl IndexMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMode::PerTrack => "per_track",
            IndexMode::TwoDimensional => "two_dimensional",
        }
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_track" | "1d" => Ok(IndexMode::PerTrack),
            "two_dimensional" | "2d" => Ok(IndexMode::TwoDimensional),
            other => Err(format!("unknown index mode '{}'", other)),
        }
    }
}

/// Hierarchy construction settings
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub mode: IndexMode,

    #[serde(default)]
    pub splitting_rule: SplittingRule,

    /// Number of independent build tasks sharing the track list
    #[serde(default = "default_task_count")]
    pub task_count: usize,

    /// This build task's position in `0..task_count`
    #[serde(default)]
    pub task_id: usize,
}

fn default_task_count() -> usize {
    1
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            mode: IndexMode::default(),
            splitting_rule: SplittingRule::default(),
            task_count: default_task_count(),
            task_id: 0,
        }
    }
}

/// Query serving settings
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Default resolution multiplier applied to the bin width
    #[serde(default = "default_resolution_divisor")]
    pub resolution_divisor: f64,

    /// Hot cache window expansion, in multiples of the query span
    #[serde(default = "default_locality_margin")]
    pub locality_margin: f64,

    /// Levels of the cached subtree kept resident after each query
    #[serde(default = "default_retained_levels")]
    pub retained_levels: usize,

    #[serde(default)]
    pub unresolved_filter: UnresolvedFilterPolicy,
}

fn default_resolution_divisor() -> f64 {
    1.0
}

fn default_locality_margin() -> f64 {
    2.0
}

fn default_retained_levels() -> usize {
    2
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            resolution_divisor: default_resolution_divisor(),
            locality_margin: default_locality_margin(),
            retained_levels: default_retained_levels(),
            unresolved_filter: UnresolvedFilterPolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tracebin").join("config.toml")),
            Some(PathBuf::from("/etc/tracebin/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index.task_count == 0 {
            return Err(ConfigError::Invalid("index.task_count must be at least 1".into()));
        }
        if self.index.task_id >= self.index.task_count {
            return Err(ConfigError::Invalid(format!(
                "index.task_id {} is outside 0..{}",
                self.index.task_id, self.index.task_count
            )));
        }
        if self.storage.capacity_bytes == 0 {
            return Err(ConfigError::Invalid("storage.capacity_bytes must be positive".into()));
        }
        if !(self.query.resolution_divisor > 0.0) {
            return Err(ConfigError::Invalid(
                "query.resolution_divisor must be positive".into(),
            ));
        }
        if !(self.query.locality_margin >= 0.0) {
            return Err(ConfigError::Invalid(
                "query.locality_margin must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Storage overrides
        if let Ok(data_dir) = std::env::var("TRACEBIN_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Ok(dataset) = std::env::var("TRACEBIN_DATASET") {
            self.storage.dataset = dataset;
        }
        if let Ok(timeout) = std::env::var("TRACEBIN_BUSY_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.storage.busy_timeout_ms = ms;
            }
        }

        // Index overrides
        if let Ok(rule) = std::env::var("TRACEBIN_SPLITTING_RULE") {
            match rule.parse() {
                Ok(rule) => self.index.splitting_rule = rule,
                Err(e) => tracing::warn!("Ignoring TRACEBIN_SPLITTING_RULE: {}", e),
            }
        }
        if let Ok(count) = std::env::var("TRACEBIN_TASK_COUNT") {
            if let Ok(n) = count.parse() {
                self.index.task_count = n;
            }
        }
        if let Ok(id) = std::env::var("TRACEBIN_TASK_ID") {
            if let Ok(n) = id.parse() {
                self.index.task_id = n;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TRACEBIN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TRACEBIN_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tracebin Configuration
#
# Environment variables override these settings:
# - TRACEBIN_DATA_DIR
# - TRACEBIN_DATASET
# - TRACEBIN_BUSY_TIMEOUT_MS
# - TRACEBIN_SPLITTING_RULE
# - TRACEBIN_TASK_COUNT
# - TRACEBIN_TASK_ID
# - TRACEBIN_LOG_LEVEL
# - TRACEBIN_LOG_FORMAT

[storage]
# Directory holding all datasets
data_dir = "~/.local/share/tracebin"

# Dataset name (subdirectory of data_dir)
dataset = "default"

# Node store capacity in bytes; provisioned up front, never grown
capacity_bytes = 1073741824

# Milliseconds a build waits for a concurrent task's write transaction
busy_timeout_ms = 600000

[index]
# Hierarchy layout: per_track or two_dimensional
mode = "per_track"

# Splitting rule: fair, midpoint or max_distance
splitting_rule = "fair"

# Partitioned builds: each task builds a contiguous slice of the tracks
task_count = 1
task_id = 0

[query]
# Multiplier applied to the bin width before deciding whether to descend
resolution_divisor = 1.0

# Hot cache window expansion in multiples of the query span
locality_margin = 2.0

# Cached levels kept after each query (root and children)
retained_levels = 2

# Filter values that were never ingested: ignore or match_nothing
unresolved_filter = "ignore"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
