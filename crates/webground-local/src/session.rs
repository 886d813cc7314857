//! One research session: providers, cache and the search -> scrape -> rank ->
//! format pipeline behind a single entry point. Quick mode skips scrape and
//! rank.

use crate::config::ResearchConfig;
use crate::firecrawl::FirecrawlScraper;
use crate::jina::JinaReader;
use crate::paginate;
use crate::progress::ProgressEmitter;
use crate::rerank;
use crate::scrape::ScraperPool;
use crate::search::{SerperSearchProvider, TavilySearchProvider};
use serde::Serialize;
use std::sync::Arc;
use webground_core::cache::{ResultCache, TtlClass};
use webground_core::context::format_context;
use webground_core::protocol::ToolCall;
use webground_core::{
    ContentScraper, ImageResult, ImageSearch, OrganicSearch, QuickSearch, RankedSource, Reranker,
    ScrapedSource, SearchMode, SearchOutcome,
};

/// Provider handles for a session; `None` means not configured.
#[derive(Clone, Default)]
pub struct Providers {
    pub organic: Option<Arc<dyn OrganicSearch>>,
    pub images: Option<Arc<dyn ImageSearch>>,
    pub quick: Option<Arc<dyn QuickSearch>>,
    /// Scrape tiers in fallback order.
    pub tiers: Vec<Arc<dyn ContentScraper>>,
    pub reranker: Option<Arc<dyn Reranker>>,
}

/// Which providers are available; booleans only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderReport {
    pub deep_search: bool,
    pub image_search: bool,
    pub quick_search: bool,
    pub scrape_tiers: Vec<&'static str>,
    pub reranker: Option<&'static str>,
}

impl Providers {
    pub fn none() -> Self {
        Self::default()
    }

    /// Every provider whose credentials are present; missing ones stay `None`.
    pub fn from_env(client: reqwest::Client) -> Self {
        let mut p = Self::none();

        match SerperSearchProvider::from_env(client.clone()) {
            Ok(s) => {
                let s = Arc::new(s);
                p.organic = Some(s.clone());
                p.images = Some(s);
            }
            Err(e) => tracing::debug!(error = %e, "deep search unavailable"),
        }
        match TavilySearchProvider::from_env(client.clone()) {
            Ok(t) => p.quick = Some(Arc::new(t)),
            Err(e) => tracing::debug!(error = %e, "quick search unavailable"),
        }
        match FirecrawlScraper::from_env(client.clone()) {
            Ok(f) => p.tiers.push(Arc::new(f)),
            Err(e) => tracing::debug!(error = %e, "firecrawl tier unavailable"),
        }
        match JinaReader::from_env(client.clone()) {
            Ok(j) => p.tiers.push(Arc::new(j)),
            Err(e) => tracing::debug!(error = %e, "jina reader tier unavailable"),
        }
        p.reranker = rerank::reranker_from_env(client);
        p
    }

    pub fn report(&self) -> ProviderReport {
        ProviderReport {
            deep_search: self.organic.is_some(),
            image_search: self.images.is_some(),
            quick_search: self.quick.is_some(),
            scrape_tiers: self.tiers.iter().map(|t| t.method().as_str()).collect(),
            reranker: self.reranker.as_ref().map(|r| r.name()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub query: String,
    /// Mode that actually ran (quick degrades to deep without a quick provider).
    pub mode: SearchMode,
    pub context_text: String,
    pub sources: Vec<RankedSource>,
    pub images: Vec<ImageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl ResearchOutcome {
    fn empty(query: &str, mode: SearchMode) -> Self {
        Self {
            query: query.to_string(),
            mode,
            context_text: String::new(),
            sources: Vec::new(),
            images: Vec::new(),
            answer: None,
        }
    }
}

pub struct ResearchSession {
    config: ResearchConfig,
    providers: Providers,
    cache: Option<Arc<dyn ResultCache>>,
    pool: ScraperPool,
}

impl ResearchSession {
    /// `cache` is ignored when caching is disabled in `config`.
    pub fn open(
        config: ResearchConfig,
        providers: Providers,
        cache: Option<Arc<dyn ResultCache>>,
    ) -> Self {
        let cache = cache.filter(|_| config.cache_enabled);
        let mut pool = ScraperPool::new(providers.tiers.clone(), &config);
        if let Some(c) = &cache {
            pool = pool.with_cache(Arc::clone(c));
        }
        tracing::debug!(report = ?providers.report(), cached = cache.is_some(), "research session opened");
        Self {
            config,
            providers,
            cache,
            pool,
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn close(self) {
        tracing::debug!("research session closed");
    }

    /// Runs the full pipeline, emitting progress and the sources block.
    ///
    /// Never fails: missing providers and provider errors shrink the result,
    /// down to an empty context.
    pub async fn run_research(
        &self,
        query: &str,
        mode: SearchMode,
        emitter: &ProgressEmitter,
    ) -> ResearchOutcome {
        let query = query.trim();
        let mode = self.effective_mode(mode);
        if query.is_empty() {
            tracing::warn!("empty research query");
            return ResearchOutcome::empty(query, mode);
        }

        emitter.searching();
        tracing::info!(query, mode = mode.as_str(), "searching");
        let found = match mode {
            SearchMode::Quick => self.quick(query).await,
            SearchMode::Deep => self.deep(query).await,
        };

        let ranked = match mode {
            // Quick results are served as the provider returned them.
            SearchMode::Quick => {
                emitter.analyzing();
                let snippets: Vec<ScrapedSource> = found
                    .organic
                    .into_iter()
                    .map(ScrapedSource::from_snippet)
                    .collect();
                tracing::info!(sources = snippets.len(), "quick results");
                rerank::rank_sources(
                    None,
                    query,
                    snippets,
                    self.config.rerank_timeout,
                    self.config.rerank_doc_chars,
                )
                .await
            }
            SearchMode::Deep => {
                let total = found.organic.len();
                emitter.reading(0, total);
                tracing::info!(total, "reading");
                let scraped = self
                    .pool
                    .scrape_all(found.organic, |done, total| {
                        emitter.reading(done, total);
                    })
                    .await;

                emitter.analyzing();
                tracing::info!(sources = scraped.len(), "analyzing");
                rerank::rank_sources(
                    self.providers.reranker.as_deref(),
                    query,
                    scraped,
                    self.config.rerank_timeout,
                    self.config.rerank_doc_chars,
                )
                .await
            }
        };

        let mut context_text = format_context(query, &ranked);
        if let Some(answer) = found.answer.as_deref() {
            context_text = format!("Direct answer from search: {answer}\n\n{context_text}");
        }
        emitter.sources(&ranked, &found.images);

        ResearchOutcome {
            query: query.to_string(),
            mode,
            context_text,
            sources: ranked,
            images: found.images,
            answer: found.answer,
        }
    }

    /// Runs a tool call parsed from the generator stream.
    ///
    /// Unknown operations are logged and yield `None`.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        emitter: &ProgressEmitter,
    ) -> Option<ResearchOutcome> {
        match call {
            ToolCall::WebResearch(p) => Some(
                self.run_research(&p.query, p.mode.unwrap_or(SearchMode::Deep), emitter)
                    .await,
            ),
            ToolCall::Unknown { name, .. } => {
                tracing::warn!(tool = %name, "skipping unknown tool call");
                None
            }
        }
    }

    fn effective_mode(&self, requested: SearchMode) -> SearchMode {
        match requested {
            SearchMode::Quick if self.providers.quick.is_none() => {
                tracing::debug!("no quick search provider; running deep");
                SearchMode::Deep
            }
            m => m,
        }
    }

    async fn deep(&self, query: &str) -> SearchOutcome {
        let Some(organic) = self.providers.organic.as_deref() else {
            tracing::warn!("no deep search provider configured");
            return SearchOutcome::default();
        };
        let key = TtlClass::WebSearch.key(&["deep", query]);
        if let Some(hit) = self.cached_outcome(&key).await {
            return hit;
        }
        let out =
            paginate::deep_search(organic, self.providers.images.as_deref(), query, &self.config)
                .await;
        self.store_outcome(&key, &out).await;
        out
    }

    async fn quick(&self, query: &str) -> SearchOutcome {
        let Some(quick) = self.providers.quick.as_deref() else {
            return SearchOutcome::default();
        };
        let key = TtlClass::WebSearch.key(&["quick", query]);
        if let Some(hit) = self.cached_outcome(&key).await {
            return hit;
        }
        let out = paginate::quick_search(quick, query, &self.config).await;
        self.store_outcome(&key, &out).await;
        out
    }

    async fn cached_outcome(&self, key: &str) -> Option<SearchOutcome> {
        let cache = self.cache.as_ref()?;
        let hit = crate::cache_get_json::<SearchOutcome>(cache, TtlClass::WebSearch, key).await;
        if hit.is_some() {
            tracing::debug!(key, "search cache hit");
        }
        hit
    }

    async fn store_outcome(&self, key: &str, out: &SearchOutcome) {
        // An empty outcome is usually an outage; don't pin it for the TTL.
        if out.organic.is_empty() {
            return;
        }
        if let Some(cache) = &self.cache {
            crate::cache_put_json(cache, key, out).await;
        }
    }
}
