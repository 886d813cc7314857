use crate::envelope::{add_envelope_fields, error_obj, research_payload, ErrorCode};
use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use webground_core::SearchMode;
use webground_local::progress::ProgressEmitter;
use webground_local::session::ResearchSession;

fn tool_result(payload: serde_json::Value) -> CallToolResult {
    // Structured content for machine consumers plus a text copy for clients
    // that only read `content[0].text`.
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

fn invalid_params(kind: &str, message: &str, hint: &str, elapsed_ms: u128) -> CallToolResult {
    let mut payload = serde_json::json!({
        "ok": false,
        "error": error_obj(ErrorCode::InvalidParams, message, hint),
    });
    add_envelope_fields(&mut payload, kind, elapsed_ms);
    tool_result(payload)
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct WebResearchArgs {
    /// Free-text research question.
    #[serde(default)]
    query: Option<String>,
    /// "deep" (default: paginated search, scraping, rerank) or "quick" (one synthesized call).
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Clone)]
pub(crate) struct WebgroundMcp {
    tool_router: RmcpToolRouter<Self>,
    session: Arc<ResearchSession>,
}

#[tool_router]
impl WebgroundMcp {
    pub(crate) fn new(session: ResearchSession) -> Self {
        Self {
            tool_router: Self::tool_router(),
            session: Arc::new(session),
        }
    }

    #[tool(
        description = "Search the web, read the top results, and return a cited context block with sources and images"
    )]
    async fn web_research(
        &self,
        params: Parameters<Option<WebResearchArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let args = params.0.unwrap_or_default();

        let query = args.query.unwrap_or_default();
        if query.trim().is_empty() {
            return Ok(invalid_params(
                "web_research",
                "query must be non-empty",
                "Pass a free-text question as `query`.",
                t0.elapsed().as_millis(),
            ));
        }
        let requested = match args.mode.as_deref() {
            None => SearchMode::Deep,
            Some(m) => match m.parse::<SearchMode>() {
                Ok(m) => m,
                Err(e) => {
                    return Ok(invalid_params(
                        "web_research",
                        &e.to_string(),
                        "Allowed modes: deep, quick.",
                        t0.elapsed().as_millis(),
                    ))
                }
            },
        };

        let emitter = ProgressEmitter::silent();
        let outcome = self
            .session
            .run_research(&query, requested, &emitter)
            .await;
        let payload = research_payload(
            &outcome,
            requested,
            &self.session.providers().report(),
            &emitter.emitted(),
            t0.elapsed().as_millis(),
        );
        Ok(tool_result(payload))
    }

    #[tool(description = "Report webground configuration + version (no secrets)")]
    async fn webground_meta(&self) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let cfg = self.session.config();
        let mut payload = serde_json::json!({
            "ok": true,
            "name": "webground",
            "version": env!("CARGO_PKG_VERSION"),
            "configured": self.session.providers().report(),
            "pipeline": {
                "target_results": cfg.target_results,
                "max_extra_pages": cfg.max_extra_pages,
                "scrape_concurrency": cfg.scrape_concurrency,
                "tier_timeout_ms": cfg.tier_timeout.as_millis(),
                "page_timeout_ms": cfg.page_timeout.as_millis(),
                "rerank_timeout_ms": cfg.rerank_timeout.as_millis(),
                "cache_enabled": cfg.cache_enabled,
            },
        });
        add_envelope_fields(&mut payload, "webground_meta", t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for WebgroundMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Web research grounding: web_research returns a budgeted, citation-ready context plus sources and images. Outputs are JSON and schema-versioned."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio(session: ResearchSession) -> Result<(), McpError> {
    let svc = WebgroundMcp::new(session);
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use webground_local::config::ResearchConfig;
    use webground_local::session::Providers;

    fn payload(r: &CallToolResult) -> serde_json::Value {
        r.structured_content.clone().unwrap_or_default()
    }

    fn server() -> WebgroundMcp {
        WebgroundMcp::new(ResearchSession::open(
            ResearchConfig::default(),
            Providers::none(),
            None,
        ))
    }

    #[tokio::test]
    async fn web_research_rejects_empty_query_and_bad_mode() {
        let s = server();
        let r = s.web_research(Parameters(None)).await.unwrap();
        let v = payload(&r);
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "invalid_params");

        let r = s
            .web_research(Parameters(Some(WebResearchArgs {
                query: Some("rates".to_string()),
                mode: Some("thorough".to_string()),
            })))
            .await
            .unwrap();
        assert_eq!(payload(&r)["error"]["code"], "invalid_params");
    }

    #[tokio::test]
    async fn web_research_without_providers_is_ok_and_empty() {
        let s = server();
        let r = s
            .web_research(Parameters(Some(WebResearchArgs {
                query: Some("interest rate decision today".to_string()),
                mode: Some("quick".to_string()),
            })))
            .await
            .unwrap();
        let v = payload(&r);
        assert_eq!(v["ok"], true);
        assert_eq!(v["schema_version"], 1);
        assert_eq!(v["mode"], "deep");
        assert_eq!(v["context_text"], "");
        assert_eq!(v["progress"][0]["stage"], "searching");
        assert_eq!(v["progress"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn meta_reports_booleans_only() {
        let r = server().webground_meta().await.unwrap();
        let v = payload(&r);
        assert_eq!(v["kind"], "webground_meta");
        assert_eq!(v["configured"]["deep_search"], false);
        assert_eq!(v["pipeline"]["target_results"], 28);
    }
}
