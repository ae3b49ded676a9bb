//! Durable fallback cache
//!
//! A JSON-file key/value store holding the last-known-good value per
//! tracked metric, so a restart resumes from cached data without waiting
//! on the network. Pure read/write: staleness policy lives in the
//! reconciliation store.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::types::{PricePoint, TokenStats};

/// File-backed key/value store. Concurrent reads, last-writer-wins writes.
#[derive(Debug)]
pub struct FallbackCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

fn price_key(token_id: &str) -> String {
    format!("price:{token_id}")
}

fn stats_key(token_id: &str) -> String {
    format!("stats:{token_id}")
}

impl FallbackCache {
    /// Open the cache, loading any previous contents from disk
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(json) => {
                let entries: HashMap<String, serde_json::Value> = serde_json::from_str(&json)
                    .with_context(|| format!("corrupt cache file: {}", path.display()))?;
                info!(
                    path = %path.display(),
                    entries = entries.len(),
                    "Loaded fallback cache"
                );
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Get a raw value by key
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().ok()?;
        let value = entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache entry has unexpected shape");
                None
            }
        }
    }

    /// Set a value and write through to disk (best-effort)
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        {
            let Ok(mut entries) = self.entries.write() else {
                warn!(key = %key, "Cache lock poisoned, dropping write");
                return;
            };
            entries.insert(key.to_string(), json);
        }

        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "Cache write-through failed");
        }
    }

    pub fn get_price(&self, token_id: &str) -> Option<PricePoint> {
        self.get(&price_key(token_id))
    }

    pub fn set_price(&self, point: &PricePoint) {
        self.set(&price_key(&point.token_id), point);
    }

    pub fn get_stats(&self, token_id: &str) -> Option<TokenStats> {
        self.get(&stats_key(token_id))
    }

    pub fn set_stats(&self, stats: &TokenStats) {
        self.set(&stats_key(&stats.token_id), stats);
    }

    fn flush(&self) -> Result<()> {
        let json = {
            let entries = self
                .entries
                .read()
                .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
            serde_json::to_string_pretty(&*entries)?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, json)?;
        Ok(())
    }
}
