use std::time::Duration;

/// Knobs for one research run. Defaults match the documented pipeline budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchConfig {
    /// Organic results wanted from deep search.
    pub target_results: usize,
    /// Pages requested after the first one when it falls short.
    pub max_extra_pages: u32,
    pub extra_page_size: usize,
    pub page_timeout: Duration,
    pub image_timeout: Duration,
    pub quick_max_results: usize,
    pub quick_timeout: Duration,
    pub scrape_concurrency: usize,
    pub tier_timeout: Duration,
    /// Upper bound on stored content per source.
    pub max_content_chars: usize,
    pub rerank_timeout: Duration,
    /// Characters of content sent to the reranker per source.
    pub rerank_doc_chars: usize,
    pub cache_enabled: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            target_results: 28,
            max_extra_pages: 3,
            extra_page_size: 10,
            page_timeout: Duration::from_secs(12),
            image_timeout: Duration::from_secs(12),
            quick_max_results: 8,
            quick_timeout: Duration::from_secs(15),
            scrape_concurrency: 8,
            tier_timeout: Duration::from_secs(9),
            max_content_chars: 12_000,
            rerank_timeout: Duration::from_secs(10),
            rerank_doc_chars: 800,
            cache_enabled: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = crate::env_nonempty(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = crate::env_nonempty(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring unparsable boolean");
            None
        }
    }
}

impl ResearchConfig {
    /// Defaults overridden by `WEBGROUND_*` variables; bad values are logged and skipped.
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Some(v) = env_parse::<usize>("WEBGROUND_TARGET_RESULTS") {
            c.target_results = v.clamp(1, 100);
        }
        if let Some(v) = env_parse::<u32>("WEBGROUND_MAX_EXTRA_PAGES") {
            c.max_extra_pages = v.min(10);
        }
        if let Some(v) = env_parse::<u64>("WEBGROUND_PAGE_TIMEOUT_MS") {
            c.page_timeout = Duration::from_millis(v.clamp(500, 60_000));
        }
        if let Some(v) = env_parse::<usize>("WEBGROUND_SCRAPE_CONCURRENCY") {
            c.scrape_concurrency = v.clamp(1, 64);
        }
        if let Some(v) = env_parse::<u64>("WEBGROUND_TIER_TIMEOUT_MS") {
            c.tier_timeout = Duration::from_millis(v.clamp(500, 60_000));
        }
        if let Some(v) = env_parse::<u64>("WEBGROUND_RERANK_TIMEOUT_MS") {
            c.rerank_timeout = Duration::from_millis(v.clamp(500, 60_000));
        }
        if let Some(v) = env_bool("WEBGROUND_CACHE") {
            c.cache_enabled = v;
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }

    #[test]
    fn defaults_match_pipeline_budgets() {
        let c = ResearchConfig::default();
        assert_eq!(c.target_results, 28);
        assert_eq!(c.max_extra_pages, 3);
        assert_eq!(c.scrape_concurrency, 8);
        assert_eq!(c.tier_timeout, Duration::from_secs(9));
        assert_eq!(c.page_timeout, Duration::from_secs(12));
    }

    #[test]
    fn env_overrides_are_clamped_and_bad_values_ignored() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("WEBGROUND_SCRAPE_CONCURRENCY", "500");
        let _g2 = EnvGuard::set("WEBGROUND_TARGET_RESULTS", "lots");
        let _g3 = EnvGuard::set("WEBGROUND_CACHE", "off");
        let c = ResearchConfig::from_env();
        assert_eq!(c.scrape_concurrency, 64);
        assert_eq!(c.target_results, 28);
        assert!(!c.cache_enabled);
    }
}
