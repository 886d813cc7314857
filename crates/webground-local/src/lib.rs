use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use webground_core::cache::{self, CacheEntry, ResultCache, TtlClass};
use webground_core::{Error, Result};

pub mod config;
pub mod firecrawl;
pub mod jina;
pub mod paginate;
pub mod progress;
pub mod rerank;
pub mod scrape;
pub mod search;
pub mod semantic;
pub mod session;

pub(crate) fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First non-blank value among `keys`, in order.
pub(crate) fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env_nonempty(k))
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("webground-local/0.1")
        .redirect(reqwest::redirect::Policy::limited(10))
        // Per-call timeouts are enforced by the pipeline; these only bound DNS/TLS/body stalls.
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::Provider(e.to_string()))
}

/// On-disk [`ResultCache`]: one JSON file per key, replaced atomically.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn hashed_key(key: &str) -> String {
        let mut h = Sha256::new();
        h.update(b"key:");
        h.update(key.as_bytes());
        hex::encode(h.finalize())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hk = Self::hashed_key(key);
        self.root
            .join(&hk[0..2])
            .join(&hk[2..4])
            .join(format!("{hk}.json"))
    }
}

impl ResultCache for FsCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let p = self.path_for(key);
        let bytes = match fs::read(&p) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Cache(e.to_string())),
        };
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| Error::Cache(e.to_string()))?;
        // Hash collisions are not worth a panic, but they are not a hit either.
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn upsert(&self, key: &str, payload: serde_json::Value, updated_at_ms: u64) -> Result<()> {
        let p = self.path_for(key);
        let dir = p
            .parent()
            .ok_or_else(|| Error::Cache("cache path has no parent".to_string()))?;
        fs::create_dir_all(dir).map_err(|e| Error::Cache(e.to_string()))?;
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            updated_at_ms,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| Error::Cache(e.to_string()))?;

        // Write next to the target, then rename over it: readers see old or new, never half.
        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::Cache(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| Error::Cache(e.to_string()))?;
        tmp.persist(&p).map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }
}

/// Cache read that degrades to a miss on any storage or decode error.
pub async fn cache_get_json<T: DeserializeOwned>(
    cache: &Arc<dyn ResultCache>,
    class: TtlClass,
    key: &str,
) -> Option<T> {
    let c = Arc::clone(cache);
    let k = key.to_string();
    let looked = tokio::task::spawn_blocking(move || cache::lookup(c.as_ref(), &k, class.ttl()))
        .await
        .map_err(|e| Error::Cache(format!("cache get join failed: {e}")));
    match looked {
        Ok(Ok(Some(v))) => match serde_json::from_value(v) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached payload did not decode; treating as miss");
                None
            }
        },
        Ok(Ok(None)) => None,
        Ok(Err(e)) | Err(e) => {
            tracing::warn!(key, error = %e, "cache read failed; treating as miss");
            None
        }
    }
}

/// Best-effort cache write; failures are logged and otherwise ignored.
pub async fn cache_put_json<T: Serialize>(cache: &Arc<dyn ResultCache>, key: &str, value: &T) {
    let payload = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(key, error = %e, "cache payload did not encode");
            return;
        }
    };
    let c = Arc::clone(cache);
    let k = key.to_string();
    let r = tokio::task::spawn_blocking(move || c.upsert(&k, payload, cache::now_epoch_ms()))
        .await
        .map_err(|e| Error::Cache(format!("cache put join failed: {e}")));
    if let Ok(Err(e)) | Err(e) = r {
        tracing::warn!(key, error = %e, "cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use webground_core::cache::{lookup_at, MemoryCache};

    #[test]
    fn fs_cache_round_trips_and_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let c = FsCache::new(tmp.path().to_path_buf());
        assert!(c.get("search:deep:q").unwrap().is_none());

        c.upsert("search:deep:q", json!({"n": 1}), 100).unwrap();
        c.upsert("search:deep:q", json!({"n": 2}), 200).unwrap();
        let e = c.get("search:deep:q").unwrap().unwrap();
        assert_eq!(e.payload, json!({"n": 2}));
        assert_eq!(e.updated_at_ms, 200);

        // Only the final file remains; no temp files left behind.
        let dir = c.path_for("search:deep:q");
        let siblings = fs::read_dir(dir.parent().unwrap()).unwrap().count();
        assert_eq!(siblings, 1);
    }

    #[test]
    fn fs_cache_honors_ttl_through_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let c = FsCache::new(tmp.path().to_path_buf());
        c.upsert("quote:AAPL", json!(189.5), 1_000).unwrap();
        let ttl = TtlClass::LiveQuote.ttl();
        assert!(lookup_at(&c, "quote:AAPL", ttl, 5_000).unwrap().is_some());
        assert!(lookup_at(&c, "quote:AAPL", ttl, 60_000).unwrap().is_none());
    }

    #[test]
    fn corrupt_entry_is_a_cache_error() {
        let tmp = tempfile::tempdir().unwrap();
        let c = FsCache::new(tmp.path().to_path_buf());
        let p = c.path_for("k");
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, b"{not json").unwrap();
        assert!(matches!(c.get("k"), Err(Error::Cache(_))));
    }

    #[tokio::test]
    async fn json_helpers_round_trip_and_miss_on_bad_shape() {
        let cache: Arc<dyn ResultCache> = Arc::new(MemoryCache::new());
        cache_put_json(&cache, "news:x", &vec!["a".to_string()]).await;
        let got: Option<Vec<String>> = cache_get_json(&cache, TtlClass::News, "news:x").await;
        assert_eq!(got, Some(vec!["a".to_string()]));

        let wrong: Option<u64> = cache_get_json(&cache, TtlClass::News, "news:x").await;
        assert!(wrong.is_none());
    }

    proptest! {
        #[test]
        fn hashed_keys_are_hex_and_paths_never_panic(key in any::<String>()) {
            let k = FsCache::hashed_key(&key);
            prop_assert_eq!(k.len(), 64);
            prop_assert!(k.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            let cache = FsCache::new(std::env::temp_dir().join("webground-proptest-cache"));
            let _p = cache.path_for(&key);
        }
    }
}
