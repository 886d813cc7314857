use serde::Deserialize;
use std::time::Instant;
use webground_core::{ContentScraper, Error, Result, ScrapeMethod};

fn firecrawl_api_key_from_env() -> Option<String> {
    crate::first_env(&["WEBGROUND_FIRECRAWL_API_KEY", "FIRECRAWL_API_KEY"])
}

/// Primary scrape tier: main-content markdown from a Firecrawl v2 endpoint.
#[derive(Debug, Clone)]
pub struct FirecrawlScraper {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    /// Server-side render budget passed through to the API.
    timeout_ms: u64,
    max_age_ms: u64,
}

impl FirecrawlScraper {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = firecrawl_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing WEBGROUND_FIRECRAWL_API_KEY (or FIRECRAWL_API_KEY)".to_string(),
            )
        })?;
        Ok(Self {
            client,
            api_key,
            endpoint: Self::endpoint_v2(),
            timeout_ms: 8_000,
            max_age_ms: 172_800_000,
        })
    }

    /// Overrides the render budget sent upstream; keep it under the tier timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn endpoint_v2() -> String {
        // Tests and enterprise proxies point this elsewhere.
        crate::env_nonempty("WEBGROUND_FIRECRAWL_ENDPOINT_V2")
            .unwrap_or_else(|| "https://api.firecrawl.dev/v2/scrape".to_string())
    }

    pub async fn fetch_markdown(&self, url: &str) -> Result<FirecrawlScrapeResult> {
        let t0 = Instant::now();

        let body = serde_json::json!({
            "url": url,
            "formats": ["markdown"],
            "onlyMainContent": true,
            "timeout": self.timeout_ms,
            "maxAge": self.max_age_ms
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Provider(format!("firecrawl scrape HTTP {status}")));
        }

        let parsed: FirecrawlScrapeResponse =
            resp.json().await.map_err(|e| Error::Parse(e.to_string()))?;
        if !parsed.success {
            return Err(Error::Provider(
                "firecrawl scrape returned success=false".to_string(),
            ));
        }

        Ok(FirecrawlScrapeResult {
            markdown: parsed.data.and_then(|d| d.markdown).unwrap_or_default(),
            elapsed_ms: t0.elapsed().as_millis(),
        })
    }
}

#[async_trait::async_trait]
impl ContentScraper for FirecrawlScraper {
    fn method(&self) -> ScrapeMethod {
        ScrapeMethod::Firecrawl
    }

    async fn scrape(&self, url: &str) -> Result<String> {
        let r = self.fetch_markdown(url).await?;
        tracing::debug!(url, elapsed_ms = r.elapsed_ms as u64, chars = r.markdown.len(), "firecrawl scrape");
        Ok(r.markdown)
    }
}

#[derive(Debug, Clone)]
pub struct FirecrawlScrapeResult {
    pub markdown: String,
    pub elapsed_ms: u128,
}

#[derive(Debug, Deserialize)]
struct FirecrawlScrapeResponse {
    success: bool,
    data: Option<FirecrawlScrapeData>,
}

#[derive(Debug, Deserialize)]
struct FirecrawlScrapeData {
    markdown: Option<String>,
}
