//! Offline lexical reranking.
//!
//! Scores each document by how much of the query's vocabulary it covers.
//! No network, no model; selected with `WEBGROUND_RERANK_BACKEND=lexical`.

use webground_core::{RerankHit, Reranker, Result};

fn tokenize(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            cur.extend(ch.to_lowercase());
        } else if !cur.is_empty() {
            if cur.chars().count() >= 2 {
                out.push(cur.clone());
            }
            cur.clear();
        }
    }
    if cur.chars().count() >= 2 {
        out.push(cur);
    }
    out.sort();
    out.dedup();
    out
}

fn overlap_score(query_toks: &[String], text_toks: &[String]) -> f32 {
    if query_toks.is_empty() || text_toks.is_empty() {
        return 0.0;
    }
    let mut i = 0usize;
    let mut j = 0usize;
    let mut inter = 0u64;
    while i < query_toks.len() && j < text_toks.len() {
        match query_toks[i].cmp(&text_toks[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                inter += 1;
                i += 1;
                j += 1;
            }
        }
    }
    inter as f32 / (query_toks.len() as f32)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    /// Hits in descending score order; ties keep input order.
    pub fn score(query: &str, documents: &[String]) -> Vec<RerankHit> {
        let q = tokenize(query.trim());
        let mut hits: Vec<RerankHit> = documents
            .iter()
            .enumerate()
            .map(|(index, d)| RerankHit {
                index,
                score: overlap_score(&q, &tokenize(d)),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.index.cmp(&b.index))
        });
        hits
    }
}

#[async_trait::async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankHit>> {
        Ok(Self::score(query, documents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tokenize_lowercases_dedups_and_drops_single_chars() {
        assert_eq!(
            tokenize("The Fed, the FED and a rate!"),
            vec!["and", "fed", "rate", "the"]
        );
        assert_eq!(tokenize("Zürich Straße"), vec!["straße", "zürich"]);
    }

    #[test]
    fn covering_the_query_ranks_first() {
        let docs = vec![
            "Weather forecast for the weekend".to_string(),
            "Central bank interest rate decision announced today".to_string(),
            "Interest in rates".to_string(),
        ];
        let hits = LexicalReranker::score("interest rate decision today", &docs);
        assert_eq!(hits[0].index, 1);
        assert!((hits[0].score - 1.0).abs() < f32::EPSILON);
        assert_eq!(hits.last().unwrap().index, 0);
    }

    #[test]
    fn empty_query_keeps_input_order() {
        let docs = vec!["b".to_string(), "a".to_string()];
        let hits = LexicalReranker::score("", &docs);
        assert_eq!(hits.iter().map(|h| h.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(hits.iter().all(|h| h.score == 0.0));
    }

    proptest! {
        #[test]
        fn hits_are_a_permutation_with_scores_in_unit_range(
            q in "[a-z ]{0,30}",
            docs in prop::collection::vec("[a-z ]{0,40}", 0..12)
        ) {
            let hits = LexicalReranker::score(&q, &docs);
            let mut idx: Vec<_> = hits.iter().map(|h| h.index).collect();
            idx.sort();
            prop_assert_eq!(idx, (0..docs.len()).collect::<Vec<_>>());
            prop_assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
        }
    }
}
