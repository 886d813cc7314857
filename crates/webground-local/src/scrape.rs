//! Bounded-concurrency scraping with tiered fallback.
//!
//! Every input result yields exactly one [`ScrapedSource`]: the first tier
//! that returns non-blank content wins, otherwise the search snippet is used.

use crate::config::ResearchConfig;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use webground_core::cache::{ResultCache, TtlClass};
use webground_core::context::{budget_for_index, truncate_chars};
use webground_core::{validate_url, ContentScraper, OrganicResult, ScrapeMethod, ScrapedSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPage {
    content: String,
    method: ScrapeMethod,
}

#[derive(Clone)]
pub struct ScraperPool {
    tiers: Vec<Arc<dyn ContentScraper>>,
    concurrency: usize,
    tier_timeout: Duration,
    max_content_chars: usize,
    cache: Option<Arc<dyn ResultCache>>,
}

impl ScraperPool {
    /// `tiers` are tried in order for each URL.
    pub fn new(tiers: Vec<Arc<dyn ContentScraper>>, cfg: &ResearchConfig) -> Self {
        Self {
            tiers,
            concurrency: cfg.scrape_concurrency.max(1),
            tier_timeout: cfg.tier_timeout,
            max_content_chars: cfg.max_content_chars,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn tier_methods(&self) -> Vec<ScrapeMethod> {
        self.tiers.iter().map(|t| t.method()).collect()
    }

    /// Scrapes all results with at most `concurrency` in flight.
    ///
    /// `on_progress(completed, total)` fires once per finished item with a
    /// strictly increasing `completed`. Output order matches input order.
    pub async fn scrape_all(
        &self,
        results: Vec<OrganicResult>,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Vec<ScrapedSource> {
        let total = results.len();
        let mut slots: Vec<Option<ScrapedSource>> = vec![None; total];

        let mut done = stream::iter(results.into_iter().enumerate())
            .map(|(i, r)| async move { (i, self.scrape_one(r).await) })
            .buffer_unordered(self.concurrency);

        let mut completed = 0usize;
        while let Some((i, s)) = done.next().await {
            slots[i] = Some(s);
            completed += 1;
            on_progress(completed, total);
        }

        slots.into_iter().flatten().collect()
    }

    /// Resolves one result; never fails.
    pub async fn scrape_one(&self, result: OrganicResult) -> ScrapedSource {
        if let Err(e) = validate_url(&result.url) {
            tracing::debug!(url = %result.url, error = %e, "skipping scrape of invalid url");
            return ScrapedSource::from_snippet(result);
        }

        let key = TtlClass::PageContent.key(&[result.url.as_str()]);
        if let Some(cache) = &self.cache {
            if let Some(hit) =
                crate::cache_get_json::<CachedPage>(cache, TtlClass::PageContent, &key).await
            {
                return self.build(result, hit.content, hit.method);
            }
        }

        for tier in &self.tiers {
            let method = tier.method();
            match timeout(self.tier_timeout, tier.scrape(&result.url)).await {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    let content = truncate_chars(text.trim(), self.max_content_chars).to_string();
                    if let Some(cache) = &self.cache {
                        let page = CachedPage {
                            content: content.clone(),
                            method,
                        };
                        crate::cache_put_json(cache, &key, &page).await;
                    }
                    return self.build(result, content, method);
                }
                Ok(Ok(_)) => {
                    tracing::debug!(url = %result.url, tier = method.as_str(), "tier returned blank content");
                }
                Ok(Err(e)) => {
                    tracing::debug!(url = %result.url, tier = method.as_str(), error = %e, "tier failed");
                }
                Err(_) => {
                    tracing::debug!(url = %result.url, tier = method.as_str(), "tier timed out");
                }
            }
        }
        ScrapedSource::from_snippet(result)
    }

    fn build(&self, result: OrganicResult, content: String, method: ScrapeMethod) -> ScrapedSource {
        ScrapedSource {
            content_char_budget: budget_for_index(result.rank),
            full_content: content,
            scrape_method: method,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use webground_core::cache::MemoryCache;
    use webground_core::{Error, Result};

    fn r(i: usize) -> OrganicResult {
        OrganicResult {
            title: format!("t{i}"),
            url: format!("https://example.com/{i}"),
            snippet: format!("snippet {i}"),
            rank: i + 1,
        }
    }

    /// Tracks peak concurrency; succeeds for URLs the predicate accepts.
    struct FakeTier {
        method: ScrapeMethod,
        accept: fn(&str) -> bool,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeTier {
        fn new(method: ScrapeMethod, accept: fn(&str) -> bool) -> Self {
            Self {
                method,
                accept,
                delay: Duration::from_millis(5),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ContentScraper for FakeTier {
        fn method(&self) -> ScrapeMethod {
            self.method
        }

        async fn scrape(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if (self.accept)(url) {
                Ok(format!("  {} body for {url}  ", self.method.as_str()))
            } else {
                Err(Error::Provider("blocked".to_string()))
            }
        }
    }

    fn index_of(url: &str) -> usize {
        url.rsplit('/').next().and_then(|s| s.parse().ok()).unwrap_or(0)
    }

    #[tokio::test]
    async fn concurrency_is_capped_and_progress_is_monotonic() {
        let tier = Arc::new(FakeTier::new(ScrapeMethod::Firecrawl, |_| true));
        let cfg = ResearchConfig::default();
        let pool = ScraperPool::new(vec![tier.clone()], &cfg);

        let mut ticks = Vec::new();
        let out = pool
            .scrape_all((0..28).map(r).collect(), |c, t| ticks.push((c, t)))
            .await;

        assert_eq!(out.len(), 28);
        assert!(tier.peak.load(Ordering::SeqCst) <= cfg.scrape_concurrency);
        assert!(tier.peak.load(Ordering::SeqCst) > 1);
        assert_eq!(ticks.len(), 28);
        assert!(ticks.windows(2).all(|w| w[1].0 == w[0].0 + 1));
        assert_eq!(ticks.last(), Some(&(28, 28)));
        assert_eq!(
            ticks.iter().filter(|(c, t)| c == t).count(),
            1,
            "completion reported exactly once"
        );
        let urls: Vec<_> = out.iter().map(|s| s.result.url.clone()).collect();
        let expected: Vec<_> = (0..28).map(|i| r(i).url).collect();
        assert_eq!(urls, expected);
    }

    #[tokio::test]
    async fn tiers_fall_through_to_snippet() {
        let primary = Arc::new(FakeTier::new(ScrapeMethod::Firecrawl, |u| index_of(u) < 20));
        let secondary = Arc::new(FakeTier::new(ScrapeMethod::Jina, |u| index_of(u) < 25));
        let pool = ScraperPool::new(
            vec![primary.clone(), secondary.clone()],
            &ResearchConfig::default(),
        );
        let out = pool.scrape_all((0..28).map(r).collect(), |_, _| {}).await;

        let count = |m: ScrapeMethod| out.iter().filter(|s| s.scrape_method == m).count();
        assert_eq!(count(ScrapeMethod::Firecrawl), 20);
        assert_eq!(count(ScrapeMethod::Jina), 5);
        assert_eq!(count(ScrapeMethod::Snippet), 3);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 8);

        assert_eq!(out[0].full_content, "firecrawl body for https://example.com/0");
        assert!(out[27].is_snippet_only());
        assert_eq!(out[27].full_content, "snippet 27");
        assert_eq!(out[0].content_char_budget, 1200);
        assert_eq!(out[27].content_char_budget, 800);
    }

    #[tokio::test]
    async fn no_tiers_and_bad_urls_yield_snippets() {
        let pool = ScraperPool::new(Vec::new(), &ResearchConfig::default());
        let mut bad = r(0);
        bad.url = "ftp://example.com/file".to_string();
        let out = pool.scrape_all(vec![bad, r(1)], |_, _| {}).await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.scrape_method == ScrapeMethod::Snippet));

        let out = pool.scrape_all(Vec::new(), |_, _| panic!("no ticks")).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn slow_tier_times_out_and_content_is_capped() {
        let mut slow = FakeTier::new(ScrapeMethod::Firecrawl, |_| true);
        slow.delay = Duration::from_millis(300);
        let cfg = ResearchConfig {
            tier_timeout: Duration::from_millis(20),
            max_content_chars: 10,
            ..ResearchConfig::default()
        };
        let fast = Arc::new(FakeTier::new(ScrapeMethod::Jina, |_| true));
        let pool = ScraperPool::new(vec![Arc::new(slow), fast], &cfg);
        let s = pool.scrape_one(r(3)).await;
        assert_eq!(s.scrape_method, ScrapeMethod::Jina);
        assert_eq!(s.full_content, "jina body ");
    }

    #[tokio::test]
    async fn dropped_scrape_releases_its_slots() {
        let mut stuck = FakeTier::new(ScrapeMethod::Firecrawl, |_| true);
        stuck.delay = Duration::from_secs(5);
        let stuck = Arc::new(stuck);
        let cfg = ResearchConfig {
            tier_timeout: Duration::from_millis(100),
            ..ResearchConfig::default()
        };
        let pool = ScraperPool::new(vec![stuck.clone()], &cfg);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            pool.scrape_all((0..16).map(r).collect(), |_, _| {}),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(stuck.calls.load(Ordering::SeqCst), cfg.scrape_concurrency);

        let out = tokio::time::timeout(
            Duration::from_secs(3),
            pool.scrape_all((0..16).map(r).collect(), |_, _| {}),
        )
        .await
        .expect("second run is not blocked by the dropped one");
        assert_eq!(out.len(), 16);
        assert!(out.iter().all(|s| s.scrape_method == ScrapeMethod::Snippet));
        assert_eq!(stuck.calls.load(Ordering::SeqCst), cfg.scrape_concurrency + 16);
    }

    #[tokio::test]
    async fn page_cache_short_circuits_tiers() {
        let tier = Arc::new(FakeTier::new(ScrapeMethod::Firecrawl, |_| true));
        let cache: Arc<dyn ResultCache> = Arc::new(MemoryCache::new());
        let pool = ScraperPool::new(vec![tier.clone()], &ResearchConfig::default())
            .with_cache(cache);

        let a = pool.scrape_one(r(0)).await;
        let b = pool.scrape_one(r(0)).await;
        assert_eq!(a, b);
        assert_eq!(tier.calls.load(Ordering::SeqCst), 1);
    }
}
