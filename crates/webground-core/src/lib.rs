use serde::{Deserialize, Serialize};

pub mod cache;
pub mod context;
pub mod protocol;
pub mod stream;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("provider failed: {0}")]
    Provider(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// One synthesized search+answer call.
    Quick,
    /// Paginated organic search, scraping, rerank, budgeted context.
    Deep,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Deep => "deep",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "deep" => Ok(Self::Deep),
            other => Err(Error::Parse(format!("unknown search mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganicResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// 1-based position after cross-page dedup.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub title: String,
    pub image_url: String,
    pub link_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMethod {
    Firecrawl,
    Jina,
    Snippet,
}

impl ScrapeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Firecrawl => "firecrawl",
            Self::Jina => "jina",
            Self::Snippet => "snippet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedSource {
    #[serde(flatten)]
    pub result: OrganicResult,
    pub full_content: String,
    pub scrape_method: ScrapeMethod,
    pub content_char_budget: usize,
}

impl ScrapedSource {
    /// Floor value used when no scrape tier produced content.
    pub fn from_snippet(result: OrganicResult) -> Self {
        let content_char_budget = context::budget_for_index(result.rank);
        Self {
            full_content: result.snippet.clone(),
            scrape_method: ScrapeMethod::Snippet,
            content_char_budget,
            result,
        }
    }

    pub fn is_snippet_only(&self) -> bool {
        self.full_content == self.result.snippet
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSource {
    #[serde(flatten)]
    pub source: ScrapedSource,
    pub relevance_score: f32,
    /// Dense 1..N over the ranked order.
    pub display_index: usize,
}

impl RankedSource {
    pub fn title(&self) -> &str {
        &self.source.result.title
    }

    pub fn url(&self) -> &str {
        &self.source.result.url
    }
}

/// Pipeline stages in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Searching,
    Reading,
    Analyzing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
}

impl ProgressEvent {
    pub fn searching() -> Self {
        Self {
            stage: Stage::Searching,
            total: None,
            completed: None,
        }
    }

    pub fn reading(completed: usize, total: usize) -> Self {
        Self {
            stage: Stage::Reading,
            total: Some(total),
            completed: Some(completed),
        }
    }

    pub fn analyzing() -> Self {
        Self {
            stage: Stage::Analyzing,
            total: None,
            completed: None,
        }
    }

    /// True if `self` may follow `prev` within one run.
    pub fn follows(&self, prev: &ProgressEvent) -> bool {
        match self.stage.cmp(&prev.stage) {
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => {
                self.completed.unwrap_or(0) >= prev.completed.unwrap_or(0)
            }
        }
    }
}

/// Combined output of a search strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub organic: Vec<OrganicResult>,
    pub images: Vec<ImageResult>,
    /// Direct answer from a synthesis-capable provider (quick mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub query: String,
    /// 1-based page number.
    pub page: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    pub organic: Vec<OrganicResult>,
    /// Images some providers return alongside organic results.
    pub inline_images: Vec<ImageResult>,
}

#[async_trait::async_trait]
pub trait OrganicSearch: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search_page(&self, req: &PageRequest) -> Result<SearchPage>;
}

#[async_trait::async_trait]
pub trait ImageSearch: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>>;
}

#[async_trait::async_trait]
pub trait QuickSearch: Send + Sync {
    fn name(&self) -> &'static str;
    async fn quick_search(&self, query: &str, max_results: usize) -> Result<SearchOutcome>;
}

/// One tier of the content-extraction chain.
#[async_trait::async_trait]
pub trait ContentScraper: Send + Sync {
    fn method(&self) -> ScrapeMethod;
    async fn scrape(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankHit {
    /// Index into the submitted document list.
    pub index: usize,
    pub score: f32,
}

#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankHit>>;
}

pub fn validate_url(raw: &str) -> Result<url::Url> {
    let u = url::Url::parse(raw).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    match u.scheme() {
        "http" | "https" => Ok(u),
        other => Err(Error::InvalidUrl(format!("unsupported scheme: {other}"))),
    }
}
