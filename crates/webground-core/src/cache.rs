//! TTL-checked key/value storage shared by every pipeline stage.
//!
//! Backends only store and return whole entries; freshness is decided here by
//! comparing the entry timestamp with the TTL of the caller's resource class.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub updated_at_ms: u64,
}

/// Resource classes and their time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    LiveQuote,
    SymbolSearch,
    News,
    Overview,
    WebSearch,
    PageContent,
}

impl TtlClass {
    pub fn ttl(self) -> Duration {
        match self {
            Self::LiveQuote => Duration::from_secs(10),
            Self::SymbolSearch => Duration::from_secs(5 * 60),
            Self::News => Duration::from_secs(60),
            Self::Overview => Duration::from_secs(30 * 60),
            Self::WebSearch => Duration::from_secs(5 * 60),
            Self::PageContent => Duration::from_secs(30 * 60),
        }
    }

    pub fn key_prefix(self) -> &'static str {
        match self {
            Self::LiveQuote => "quote",
            Self::SymbolSearch => "symbol",
            Self::News => "news",
            Self::Overview => "overview",
            Self::WebSearch => "search",
            Self::PageContent => "page",
        }
    }

    /// Namespaced key so classes never collide.
    pub fn key(self, parts: &[&str]) -> String {
        let mut out = self.key_prefix().to_string();
        for p in parts {
            out.push(':');
            out.push_str(p.trim());
        }
        out
    }
}

pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Key/value storage with whole-entry replace semantics.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    /// Last writer wins; an entry is never observable half-written.
    fn upsert(&self, key: &str, payload: serde_json::Value, updated_at_ms: u64) -> Result<()>;
}

pub fn is_fresh(entry: &CacheEntry, ttl: Duration, now_ms: u64) -> bool {
    now_ms.saturating_sub(entry.updated_at_ms) <= ttl.as_millis() as u64
}

/// Returns the payload only if the entry is within `ttl` at `now_ms`.
pub fn lookup_at(
    cache: &dyn ResultCache,
    key: &str,
    ttl: Duration,
    now_ms: u64,
) -> Result<Option<serde_json::Value>> {
    Ok(cache
        .get(key)?
        .filter(|e| is_fresh(e, ttl, now_ms))
        .map(|e| e.payload))
}

pub fn lookup(
    cache: &dyn ResultCache,
    key: &str,
    ttl: Duration,
) -> Result<Option<serde_json::Value>> {
    lookup_at(cache, key, ttl, now_epoch_ms())
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let g = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(g.get(key).cloned())
    }

    fn upsert(&self, key: &str, payload: serde_json::Value, updated_at_ms: u64) -> Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            updated_at_ms,
        };
        let mut g = self.entries.write().unwrap_or_else(|e| e.into_inner());
        g.insert(key.to_string(), entry);
        Ok(())
    }
}
