use serde::Deserialize;
use webground_core::{
    Error, ImageResult, ImageSearch, OrganicResult, OrganicSearch, PageRequest, QuickSearch,
    Result, SearchOutcome, SearchPage,
};

fn serper_api_key_from_env() -> Option<String> {
    crate::first_env(&["WEBGROUND_SERPER_API_KEY", "SERPER_API_KEY"])
}

fn tavily_api_key_from_env() -> Option<String> {
    crate::first_env(&["WEBGROUND_TAVILY_API_KEY", "TAVILY_API_KEY"])
}

fn serper_base_from_env() -> String {
    crate::env_nonempty("WEBGROUND_SERPER_ENDPOINT")
        .unwrap_or_else(|| "https://google.serper.dev".to_string())
}

fn tavily_endpoint_from_env() -> String {
    crate::env_nonempty("WEBGROUND_TAVILY_ENDPOINT")
        .unwrap_or_else(|| "https://api.tavily.com/search".to_string())
}

/// Paginated organic search plus a dedicated image endpoint (Serper-compatible API).
#[derive(Debug, Clone)]
pub struct SerperSearchProvider {
    client: reqwest::Client,
    api_key: String,
    base: String,
}

impl SerperSearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = serper_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing WEBGROUND_SERPER_API_KEY (or SERPER_API_KEY)".to_string(),
            )
        })?;
        Ok(Self {
            client,
            api_key,
            base: serper_base_from_env(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base.trim_end_matches('/'))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Provider(format!("serper {path} HTTP {status}")));
        }
        resp.json().await.map_err(|e| Error::Parse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SerperSearchResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
    #[serde(default)]
    images: Vec<SerperImage>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    link: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerperImagesResponse {
    #[serde(default)]
    images: Vec<SerperImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperImage {
    title: Option<String>,
    image_url: Option<String>,
    link: Option<String>,
}

impl SerperImage {
    fn into_result(self) -> Option<ImageResult> {
        let image_url = self.image_url?;
        Some(ImageResult {
            title: self.title.unwrap_or_default(),
            link_url: self.link.unwrap_or_else(|| image_url.clone()),
            image_url,
        })
    }
}

#[async_trait::async_trait]
impl OrganicSearch for SerperSearchProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn search_page(&self, req: &PageRequest) -> Result<SearchPage> {
        let body = serde_json::json!({
            "q": req.query,
            "num": req.count,
            "page": req.page,
        });
        let parsed: SerperSearchResponse = self.post("search", body).await?;

        let mut organic = Vec::new();
        for (i, r) in parsed.organic.into_iter().enumerate() {
            let Some(url) = r.link else { continue };
            organic.push(OrganicResult {
                title: r.title.unwrap_or_default(),
                url,
                snippet: r.snippet.unwrap_or_default(),
                rank: i + 1,
            });
        }
        Ok(SearchPage {
            organic,
            inline_images: parsed
                .images
                .into_iter()
                .filter_map(SerperImage::into_result)
                .collect(),
        })
    }
}

#[async_trait::async_trait]
impl ImageSearch for SerperSearchProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>> {
        let parsed: SerperImagesResponse =
            self.post("images", serde_json::json!({ "q": query })).await?;
        Ok(parsed
            .images
            .into_iter()
            .filter_map(SerperImage::into_result)
            .collect())
    }
}

/// Single-call search with a synthesized answer.
#[derive(Debug, Clone)]
pub struct TavilySearchProvider {
    client: reqwest::Client,
    api_key: String,
}

impl TavilySearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = tavily_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured("missing WEBGROUND_TAVILY_API_KEY (or TAVILY_API_KEY)".to_string())
        })?;
        Ok(Self { client, api_key })
    }
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
    #[serde(default)]
    images: Vec<TavilyImage>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    title: Option<String>,
    content: Option<String>,
}

/// Tavily returns bare URLs, or objects when descriptions are requested.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TavilyImage {
    Url(String),
    Described {
        url: String,
        description: Option<String>,
    },
}

impl TavilyImage {
    fn into_result(self) -> ImageResult {
        let (url, title) = match self {
            Self::Url(u) => (u, String::new()),
            Self::Described { url, description } => (url, description.unwrap_or_default()),
        };
        ImageResult {
            title,
            image_url: url.clone(),
            link_url: url,
        }
    }
}

#[async_trait::async_trait]
impl QuickSearch for TavilySearchProvider {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn quick_search(&self, query: &str, max_results: usize) -> Result<SearchOutcome> {
        let body = serde_json::json!({
            "query": query,
            "max_results": max_results,
            "include_answer": true,
            "include_images": true,
            "include_raw_content": false,
            "search_depth": "basic",
        });

        let resp = self
            .client
            .post(tavily_endpoint_from_env())
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
            return Err(Error::Provider(format!("tavily search HTTP {status}")));
        }

        let parsed: TavilySearchResponse =
            resp.json().await.map_err(|e| Error::Parse(e.to_string()))?;

        let organic = parsed
            .results
            .into_iter()
            .take(max_results)
            .enumerate()
            .map(|(i, r)| OrganicResult {
                title: r.title.unwrap_or_default(),
                url: r.url,
                snippet: r.content.unwrap_or_default(),
                rank: i + 1,
            })
            .collect();

        Ok(SearchOutcome {
            organic,
            images: parsed
                .images
                .into_iter()
                .map(TavilyImage::into_result)
                .collect(),
            answer: parsed.answer.filter(|a| !a.trim().is_empty()),
        })
    }
}
