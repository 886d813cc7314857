use serde::Serialize;
use webground_core::{ProgressEvent, SearchMode};
use webground_local::session::{ProviderReport, ResearchOutcome};

pub(crate) const SCHEMA_VERSION: u64 = 1;

/// More than this many snippet-only sources earns a `snippet_heavy` warning.
const SNIPPET_HEAVY: usize = webground_core::context::SNIPPET_ONLY_DISCLAIMER_THRESHOLD;

pub(crate) fn warning_hint(code: &'static str) -> Option<&'static str> {
    match code {
        "no_search_provider" => Some(
            "No deep search provider is configured. Set WEBGROUND_SERPER_API_KEY (or SERPER_API_KEY).",
        ),
        "quick_degraded_to_deep" => Some(
            "Quick mode needs WEBGROUND_TAVILY_API_KEY (or TAVILY_API_KEY); deep mode ran instead.",
        ),
        "no_scrape_tiers" => Some(
            "No scrape tier is configured, so every source is a search snippet. Set WEBGROUND_FIRECRAWL_API_KEY or WEBGROUND_JINA_API_KEY.",
        ),
        "snippet_heavy" => Some(
            "Many sources could only be read as snippets; the context carries a reduced-depth note.",
        ),
        "empty_context" => Some(
            "No sources were found. The context is empty; answer without citations or retry later.",
        ),
        _ => None,
    }
}

pub(crate) fn warning_hints_from(codes: &[&'static str]) -> serde_json::Value {
    let mut m = serde_json::Map::new();
    for &c in codes {
        if let Some(h) = warning_hint(c) {
            m.insert(c.to_string(), serde_json::Value::String(h.to_string()));
        }
    }
    serde_json::Value::Object(m)
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum ErrorCode {
    InvalidParams,
    UnexpectedError,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    pub(crate) fn retryable(self) -> bool {
        match self {
            Self::UnexpectedError => true,
            Self::InvalidParams => false,
        }
    }
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
    if payload.get("request").is_none() {
        payload["request"] = serde_json::Value::Null;
    }
}

pub(crate) fn error_obj(
    code: ErrorCode,
    message: impl ToString,
    hint: impl ToString,
) -> serde_json::Value {
    #[derive(Serialize)]
    struct ErrorObject {
        code: &'static str,
        message: String,
        hint: String,
        retryable: bool,
    }

    let e = ErrorObject {
        code: code.as_str(),
        message: message.to_string(),
        hint: hint.to_string(),
        retryable: code.retryable(),
    };
    match serde_json::to_value(e) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "code": code.as_str(),
            "message": message.to_string(),
            "hint": hint.to_string(),
            "retryable": code.retryable()
        }),
    }
}

/// Warning codes for a finished run, in a stable order.
pub(crate) fn research_warnings(
    outcome: &ResearchOutcome,
    requested: SearchMode,
    report: &ProviderReport,
) -> Vec<&'static str> {
    let mut w = Vec::new();
    if !report.deep_search && outcome.mode == SearchMode::Deep {
        w.push("no_search_provider");
    }
    if requested == SearchMode::Quick && outcome.mode == SearchMode::Deep {
        w.push("quick_degraded_to_deep");
    }
    if report.scrape_tiers.is_empty() && !outcome.sources.is_empty() {
        w.push("no_scrape_tiers");
    }
    let snippet_only = outcome
        .sources
        .iter()
        .filter(|s| s.source.is_snippet_only())
        .count();
    if snippet_only > SNIPPET_HEAVY {
        w.push("snippet_heavy");
    }
    if outcome.context_text.trim().is_empty() {
        w.push("empty_context");
    }
    w
}

/// JSON envelope for a research run (CLI `--output json` and the `web_research` tool).
pub(crate) fn research_payload(
    outcome: &ResearchOutcome,
    requested: SearchMode,
    report: &ProviderReport,
    progress: &[ProgressEvent],
    elapsed_ms: u128,
) -> serde_json::Value {
    let warnings = research_warnings(outcome, requested, report);
    let mut payload = serde_json::json!({
        "ok": true,
        "request": {
            "query": outcome.query,
            "mode": requested.as_str(),
        },
        "mode": outcome.mode.as_str(),
        "context_text": outcome.context_text,
        "sources": outcome.sources,
        "images": outcome.images,
        "answer": outcome.answer,
        "progress": progress,
        "warnings": warnings,
        "warning_hints": warning_hints_from(&warnings),
    });
    add_envelope_fields(&mut payload, "web_research", elapsed_ms);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_outcome(mode: SearchMode) -> ResearchOutcome {
        ResearchOutcome {
            query: "q".to_string(),
            mode,
            context_text: String::new(),
            sources: Vec::new(),
            images: Vec::new(),
            answer: None,
        }
    }

    fn bare_report() -> ProviderReport {
        ProviderReport {
            deep_search: false,
            image_search: false,
            quick_search: false,
            scrape_tiers: Vec::new(),
            reranker: None,
        }
    }

    #[test]
    fn unconfigured_run_warns_with_hints() {
        let out = empty_outcome(SearchMode::Deep);
        let v = research_payload(&out, SearchMode::Quick, &bare_report(), &[], 3);
        assert_eq!(v["schema_version"], 1);
        assert_eq!(v["kind"], "web_research");
        assert_eq!(v["ok"], true);
        assert_eq!(v["request"]["mode"], "quick");
        assert_eq!(v["mode"], "deep");
        let codes: Vec<_> = v["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c.as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            codes,
            vec!["no_search_provider", "quick_degraded_to_deep", "empty_context"]
        );
        assert!(v["warning_hints"]["no_search_provider"]
            .as_str()
            .unwrap()
            .contains("SERPER"));
    }

    #[test]
    fn error_objects_carry_retryability() {
        let e = error_obj(ErrorCode::InvalidParams, "query is empty", "pass a query");
        assert_eq!(e["code"], "invalid_params");
        assert_eq!(e["retryable"], false);
    }
}
