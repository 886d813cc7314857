//! Search strategies over the provider traits: paginated deep search and
//! single-call quick search. Provider failures never escape; they shrink
//! the outcome instead.

use crate::config::ResearchConfig;
use std::collections::HashSet;
use tokio::time::timeout;
use webground_core::{
    ImageResult, ImageSearch, OrganicResult, OrganicSearch, PageRequest, QuickSearch,
    SearchOutcome, SearchPage,
};

/// Appends results whose URL has not been seen yet; returns how many were new.
pub fn append_unseen(
    seen: &mut HashSet<String>,
    out: &mut Vec<OrganicResult>,
    page: Vec<OrganicResult>,
) -> usize {
    let mut added = 0;
    for r in page {
        let key = r.url.trim().to_string();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        out.push(r);
        added += 1;
    }
    added
}

fn renumber(results: &mut [OrganicResult]) {
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}

async fn fetch_page(
    provider: &dyn OrganicSearch,
    req: &PageRequest,
    cfg: &ResearchConfig,
) -> Option<SearchPage> {
    match timeout(cfg.page_timeout, provider.search_page(req)).await {
        Ok(Ok(page)) => Some(page),
        Ok(Err(e)) => {
            tracing::warn!(provider = provider.name(), page = req.page, error = %e, "search page failed");
            None
        }
        Err(_) => {
            tracing::warn!(provider = provider.name(), page = req.page, "search page timed out");
            None
        }
    }
}

/// Collects up to `target_results` unique organic results across pages.
///
/// Also returns inline images from the first page for use when no dedicated
/// image search is available.
pub async fn collect_organic(
    provider: &dyn OrganicSearch,
    query: &str,
    cfg: &ResearchConfig,
) -> (Vec<OrganicResult>, Vec<ImageResult>) {
    let target = cfg.target_results;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let first = PageRequest {
        query: query.to_string(),
        page: 1,
        count: target,
    };
    let Some(page) = fetch_page(provider, &first, cfg).await else {
        return (out, Vec::new());
    };
    let inline_images = page.inline_images;
    if append_unseen(&mut seen, &mut out, page.organic) == 0 {
        tracing::debug!("first search page was empty");
        return (out, inline_images);
    }

    for page_no in 2..2 + cfg.max_extra_pages {
        if out.len() >= target {
            break;
        }
        let req = PageRequest {
            query: query.to_string(),
            page: page_no,
            count: cfg.extra_page_size,
        };
        let Some(page) = fetch_page(provider, &req, cfg).await else {
            break;
        };
        let added = append_unseen(&mut seen, &mut out, page.organic);
        tracing::debug!(page = page_no, added, total = out.len(), "search page merged");
        if added == 0 {
            break;
        }
    }

    out.truncate(target);
    renumber(&mut out);
    (out, inline_images)
}

async fn dedicated_images(
    images: Option<&dyn ImageSearch>,
    query: &str,
    cfg: &ResearchConfig,
) -> Option<Vec<ImageResult>> {
    let provider = images?;
    match timeout(cfg.image_timeout, provider.search_images(query)).await {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            tracing::warn!(provider = provider.name(), error = %e, "image search failed");
            None
        }
        Err(_) => {
            tracing::warn!(provider = provider.name(), "image search timed out");
            None
        }
    }
}

/// Deep mode: paginated organic search with an independent image call.
pub async fn deep_search(
    organic: &dyn OrganicSearch,
    images: Option<&dyn ImageSearch>,
    query: &str,
    cfg: &ResearchConfig,
) -> SearchOutcome {
    let ((organic, inline_images), dedicated) = tokio::join!(
        collect_organic(organic, query, cfg),
        dedicated_images(images, query, cfg)
    );
    SearchOutcome {
        organic,
        images: dedicated.unwrap_or(inline_images),
        answer: None,
    }
}

/// Quick mode: one synthesized call, no retry.
pub async fn quick_search(
    provider: &dyn QuickSearch,
    query: &str,
    cfg: &ResearchConfig,
) -> SearchOutcome {
    match timeout(
        cfg.quick_timeout,
        provider.quick_search(query, cfg.quick_max_results),
    )
    .await
    {
        Ok(Ok(mut o)) => {
            o.organic.truncate(cfg.quick_max_results);
            renumber(&mut o.organic);
            o
        }
        Ok(Err(e)) => {
            tracing::warn!(provider = provider.name(), error = %e, "quick search failed");
            SearchOutcome::default()
        }
        Err(_) => {
            tracing::warn!(provider = provider.name(), "quick search timed out");
            SearchOutcome::default()
        }
    }
}
