//! Relevance ordering of scraped sources.

use crate::jina::JinaReranker;
use crate::semantic::LexicalReranker;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use webground_core::context::{budget_for_index, truncate_chars};
use webground_core::{RankedSource, RerankHit, Reranker, ScrapedSource};

/// Text sent to the reranker for one source: title, newline, leading content.
pub fn rerank_document(source: &ScrapedSource, doc_chars: usize) -> String {
    format!(
        "{}\n{}",
        source.result.title,
        truncate_chars(source.full_content.trim(), doc_chars)
    )
}

/// Turns reranker hits into a full permutation of `0..n` with scores.
///
/// Out-of-range and repeated indices are ignored; sources the reranker left
/// out are appended in their original order with score 0.
pub fn order_from_hits(hits: &[RerankHit], n: usize) -> Vec<(usize, f32)> {
    let mut used = vec![false; n];
    let mut order = Vec::with_capacity(n);
    for h in hits {
        if h.index < n && !used[h.index] {
            used[h.index] = true;
            let score = if h.score.is_finite() { h.score } else { 0.0 };
            order.push((h.index, score));
        }
    }
    order.extend((0..n).filter(|i| !used[*i]).map(|i| (i, 0.0)));
    order
}

fn apply_order(sources: Vec<ScrapedSource>, order: &[(usize, f32)]) -> Vec<RankedSource> {
    let mut slots: Vec<Option<ScrapedSource>> = sources.into_iter().map(Some).collect();
    order
        .iter()
        .filter_map(|(i, score)| slots.get_mut(*i).and_then(Option::take).map(|s| (s, *score)))
        .enumerate()
        .map(|(pos, (mut source, relevance_score))| {
            let display_index = pos + 1;
            source.content_char_budget = budget_for_index(display_index);
            RankedSource {
                source,
                relevance_score,
                display_index,
            }
        })
        .collect()
}

/// Orders sources by relevance and assigns dense display indices.
///
/// Any reranker failure or timeout keeps the input order with zero scores.
pub async fn rank_sources(
    reranker: Option<&dyn Reranker>,
    query: &str,
    sources: Vec<ScrapedSource>,
    rerank_timeout: Duration,
    doc_chars: usize,
) -> Vec<RankedSource> {
    let n = sources.len();
    let passthrough: Vec<(usize, f32)> = (0..n).map(|i| (i, 0.0)).collect();
    let Some(rr) = reranker.filter(|_| n > 1) else {
        return apply_order(sources, &passthrough);
    };

    let docs: Vec<String> = sources
        .iter()
        .map(|s| rerank_document(s, doc_chars))
        .collect();
    let order = match timeout(rerank_timeout, rr.rerank(query, &docs)).await {
        Ok(Ok(hits)) => order_from_hits(&hits, n),
        Ok(Err(e)) => {
            tracing::warn!(reranker = rr.name(), error = %e, "rerank failed; keeping search order");
            passthrough
        }
        Err(_) => {
            tracing::warn!(reranker = rr.name(), "rerank timed out; keeping search order");
            passthrough
        }
    };
    apply_order(sources, &order)
}

/// Picks a reranker from `WEBGROUND_RERANK_BACKEND` (`jina`, `lexical`, `off`).
///
/// Unset means Jina when a key is present. With no key there is no reranker
/// and sources keep search order.
pub fn reranker_from_env(client: reqwest::Client) -> Option<Arc<dyn Reranker>> {
    let backend = crate::env_nonempty("WEBGROUND_RERANK_BACKEND").map(|s| s.to_ascii_lowercase());
    reranker_for_backend(backend.as_deref(), || JinaReranker::from_env(client).ok())
}

fn reranker_for_backend(
    backend: Option<&str>,
    jina: impl FnOnce() -> Option<JinaReranker>,
) -> Option<Arc<dyn Reranker>> {
    let jina_or_none = |rr: Option<JinaReranker>| rr.map(|j| Arc::new(j) as Arc<dyn Reranker>);
    match backend {
        Some("off" | "none") => None,
        Some("lexical") => Some(Arc::new(LexicalReranker)),
        Some("jina") => {
            let rr = jina_or_none(jina());
            if rr.is_none() {
                tracing::warn!("jina reranker requested but no key is set; keeping search order");
            }
            rr
        }
        None => jina_or_none(jina()),
        Some(other) => {
            tracing::warn!(backend = other, "unknown rerank backend; using the default");
            jina_or_none(jina())
        }
    }
}
