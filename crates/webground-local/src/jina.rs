//! Jina reader (secondary scrape tier) and Jina rerank API.

use serde::Deserialize;
use webground_core::{ContentScraper, Error, RerankHit, Reranker, Result, ScrapeMethod};

pub const DEFAULT_RERANK_MODEL: &str = "jina-reranker-v2-base-multilingual";

fn jina_api_key_from_env() -> Option<String> {
    crate::first_env(&["WEBGROUND_JINA_API_KEY", "JINA_API_KEY"])
}

fn missing_key() -> Error {
    Error::NotConfigured("missing WEBGROUND_JINA_API_KEY (or JINA_API_KEY)".to_string())
}

#[derive(Debug, Clone)]
pub struct JinaReader {
    client: reqwest::Client,
    api_key: String,
    base: String,
}

impl JinaReader {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = jina_api_key_from_env().ok_or_else(missing_key)?;
        let base = crate::env_nonempty("WEBGROUND_JINA_READER_ENDPOINT")
            .unwrap_or_else(|| "https://r.jina.ai".to_string());
        Ok(Self {
            client,
            api_key,
            base,
        })
    }

    fn reader_url(&self, url: &str) -> String {
        format!("{}/{url}", self.base.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl ContentScraper for JinaReader {
    fn method(&self) -> ScrapeMethod {
        ScrapeMethod::Jina
    }

    async fn scrape(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(self.reader_url(url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .header("X-Return-Format", "markdown")
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Provider(format!("jina reader HTTP {status}")));
        }
        resp.text().await.map_err(|e| Error::Parse(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct JinaReranker {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl JinaReranker {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = jina_api_key_from_env().ok_or_else(missing_key)?;
        Ok(Self {
            client,
            api_key,
            endpoint: crate::env_nonempty("WEBGROUND_JINA_RERANK_ENDPOINT")
                .unwrap_or_else(|| "https://api.jina.ai/v1/rerank".to_string()),
            model: crate::env_nonempty("WEBGROUND_RERANK_MODEL")
                .unwrap_or_else(|| DEFAULT_RERANK_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Deserialize)]
struct JinaRerankResponse {
    #[serde(default)]
    results: Vec<JinaRerankResult>,
}

#[derive(Debug, Deserialize)]
struct JinaRerankResult {
    index: usize,
    relevance_score: f32,
}

#[async_trait::async_trait]
impl Reranker for JinaReranker {
    fn name(&self) -> &'static str {
        "jina"
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankHit>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": documents.len(),
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Provider(format!("jina rerank HTTP {status}")));
        }
        let parsed: JinaRerankResponse =
            resp.json().await.map_err(|e| Error::Parse(e.to_string()))?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| RerankHit {
                index: r.index,
                score: r.relevance_score,
            })
            .collect())
    }
}
