//! Configuration management for TokenSync
//!
//! Loads from a YAML file + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub feed: FeedConfig,
    pub snapshot: SnapshotConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// WebSocket endpoint of the streaming price/trade feed
    pub ws_url: String,
    /// Base reconnect delay in milliseconds
    pub backoff_base_ms: u64,
    /// Reconnect delay cap in milliseconds
    pub backoff_cap_ms: u64,
    /// Outbound event channel capacity
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Base URL of the REST snapshot API
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Full refresh interval (history + stats) in seconds
    pub refresh_interval_secs: u64,
    /// Price-only refresh interval in seconds
    pub price_refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Live price buffer capacity per token (FIFO eviction)
    pub live_buffer_cap: usize,
    /// Recent-trades ring buffer capacity per token
    pub trade_ring_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Path of the durable fallback cache file
    pub path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            snapshot: SnapshotConfig::default(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://feed.tokensync.io/ws".to_string(),
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            channel_capacity: 256,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tokensync.io".to_string(),
            timeout_secs: 10,
            refresh_interval_secs: 60,
            price_refresh_interval_secs: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            live_buffer_cap: 100,
            trade_ring_cap: 20,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: "data/fallback_cache.json".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file with `TOKENSYNC_*` env overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        // .env is optional; missing file is fine
        let _ = dotenvy::dotenv();

        let path = path.as_ref();
        let mut builder = Config::builder();

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("TOKENSYNC").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.store.live_buffer_cap, 100);
        assert_eq!(cfg.store.trade_ring_cap, 20);
        assert_eq!(cfg.snapshot.timeout_secs, 10);
        assert_eq!(cfg.snapshot.refresh_interval_secs, 60);
        assert_eq!(cfg.snapshot.price_refresh_interval_secs, 30);
        assert_eq!(cfg.feed.backoff_base_ms, 1_000);
        assert_eq!(cfg.feed.backoff_cap_ms, 30_000);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = EngineConfig::load("does/not/exist.yaml").expect("load should succeed");
        assert_eq!(cfg.store.live_buffer_cap, 100);
    }
}
