//! Configuration for the firehose connector, the store and the initial filter.
//!
//! Everything has a default, so an empty TOML file (or no file at all) yields
//! a working setup pointed at the public Jetstream instance.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreError, Result};
use crate::filter::{FilterConfig, SensitivityPolicy};
use crate::media::DEFAULT_CDN_BASE;
use crate::store::LayoutMode;

/// Upper bound on stored posts
pub const MAX_CAPACITY: usize = 200;

/// Eviction quantum; matches the column count of the grid layout
pub const COLUMN_COUNT: usize = 6;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

pub const RECONNECT_DELAY_MS: u64 = 3000;

/// Silence after which a connection is treated as dead
pub const LIVENESS_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_POST_COLLECTION: &str = "app.bsky.feed.post";

fn default_jetstream_endpoint() -> String {
    "wss://jetstream2.us-east.bsky.network/subscribe".to_string()
}

fn default_collection() -> String {
    DEFAULT_POST_COLLECTION.to_string()
}

fn default_cdn_base() -> String {
    DEFAULT_CDN_BASE.to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    MAX_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay_ms() -> u64 {
    RECONNECT_DELAY_MS
}

fn default_liveness_timeout_secs() -> Option<u64> {
    Some(LIVENESS_TIMEOUT_SECS)
}

fn default_capacity() -> usize {
    MAX_CAPACITY
}

fn default_column_count() -> usize {
    COLUMN_COUNT
}

/// Wire shape of inbound frames. Fixed per connector, never negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// JSON commit events, one post per record with all of its images
    #[default]
    Envelope,
    /// CAR block containers, one post per embedded image
    Block,
}

impl std::str::FromStr for DecodeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "envelope" | "jetstream" | "json" => Ok(Self::Envelope),
            "block" | "car" | "cbor" => Ok(Self::Block),
            other => Err(format!(
                "unknown decode mode '{}', expected envelope or block",
                other
            )),
        }
    }
}

/// Firehose connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirehoseConfig {
    /// Stream endpoint; bare hosts and http(s) URLs are normalized to wss
    #[serde(default = "default_jetstream_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub mode: DecodeMode,
    /// Record collection (and record `$type`) to accept
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// `None` disables the liveness check
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: Option<u64>,
    #[serde(default = "default_cdn_base")]
    pub cdn_base: String,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            endpoint: default_jetstream_endpoint(),
            mode: DecodeMode::default(),
            collection: default_collection(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            liveness_timeout_secs: default_liveness_timeout_secs(),
            cdn_base: default_cdn_base(),
        }
    }
}

impl FirehoseConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness_timeout_secs.map(Duration::from_secs)
    }
}

/// Bounded store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Eviction quantum. `1` trims back to `capacity` on every overflow.
    #[serde(default = "default_column_count")]
    pub column_count: usize,
    #[serde(default)]
    pub sensitivity: SensitivityPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_CAPACITY,
            column_count: COLUMN_COUNT,
            sensitivity: SensitivityPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Plain trim-to-capacity eviction.
    pub fn trim_to_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            column_count: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let reason = if self.capacity == 0 {
            Some("capacity must be at least 1")
        } else if self.column_count == 0 {
            Some("column_count must be at least 1")
        } else if self.column_count > self.capacity {
            Some("column_count may not exceed capacity")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CoreError::InvalidStoreConfig {
                capacity: self.capacity,
                column_count: self.column_count,
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryConfig {
    #[serde(default)]
    pub firehose: FirehoseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub layout: LayoutMode,
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<GalleryConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "readable TOML file".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    parse_config(&content, path)
}

/// Parse configuration text; `origin` is only used in error reports.
pub fn parse_config(content: &str, origin: &Path) -> Result<GalleryConfig> {
    let config: GalleryConfig =
        toml::from_str(content).map_err(|e| CoreError::ConfigurationError {
            config_path: origin.display().to_string(),
            field: "content".to_string(),
            expected: "valid TOML configuration".to_string(),
            cause: ConfigError::TomlParse(e.to_string()),
        })?;

    config
        .store
        .validate()
        .map_err(|e| CoreError::ConfigurationError {
            config_path: origin.display().to_string(),
            field: "store".to_string(),
            expected: "capacity >= column_count >= 1".to_string(),
            cause: ConfigError::InvalidValue {
                field: "store".to_string(),
                reason: e.to_string(),
            },
        })?;

    Ok(config)
}

/// Standard config file locations, in lookup order
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("skyglass.toml")];

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("skyglass").join("config.toml"));
    }

    paths
}

/// Load from the first standard location that exists, or fall back to defaults
pub async fn load_config_from_standard_locations() -> Result<GalleryConfig> {
    for path in config_paths() {
        if path.exists() {
            return load_config(&path).await;
        }
    }

    Ok(GalleryConfig::default())
}
