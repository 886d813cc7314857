//! Server-side emission of `<status>` and `<sources>` blocks.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use webground_core::context::truncate_chars;
use webground_core::protocol::{self, SourcesPayload};
use webground_core::{ImageResult, ProgressEvent, RankedSource};

/// Destination for encoded control blocks, in emission order.
pub trait BlockSink: Send + Sync {
    fn emit(&self, block: String);
}

pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl BlockSink for ChannelSink {
    fn emit(&self, block: String) {
        // Receiver gone means nobody is rendering; the run still completes.
        let _ = self.tx.send(block);
    }
}

/// Collects blocks in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    blocks: Mutex<Vec<String>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> Vec<String> {
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All blocks concatenated, as the generator would stream them.
    pub fn joined(&self) -> String {
        self.blocks().concat()
    }
}

impl BlockSink for VecSink {
    fn emit(&self, block: String) {
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(block);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl BlockSink for NullSink {
    fn emit(&self, _block: String) {}
}

/// Emits progress for one run and refuses to move backwards.
pub struct ProgressEmitter {
    sink: Arc<dyn BlockSink>,
    history: Mutex<Vec<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn new(sink: Arc<dyn BlockSink>) -> Self {
        Self {
            sink,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Emits `ev` unless it would regress the run; returns whether it was sent.
    pub fn status(&self, ev: ProgressEvent) -> bool {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = history.last() {
            if !ev.follows(prev) {
                tracing::debug!(?ev, ?prev, "dropping regressive progress event");
                return false;
            }
        }
        match protocol::encode_status(&ev) {
            Ok(block) => {
                self.sink.emit(block);
                history.push(ev);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "status block did not encode");
                false
            }
        }
    }

    pub fn searching(&self) -> bool {
        self.status(ProgressEvent::searching())
    }

    pub fn reading(&self, completed: usize, total: usize) -> bool {
        self.status(ProgressEvent::reading(completed, total))
    }

    pub fn analyzing(&self) -> bool {
        self.status(ProgressEvent::analyzing())
    }

    /// Emits the sources block; each source's content is cut to its budget.
    pub fn sources(&self, sources: &[RankedSource], images: &[ImageResult]) {
        let payload = SourcesPayload {
            sources: sources
                .iter()
                .map(|s| {
                    let mut s = s.clone();
                    let budget = s.source.content_char_budget;
                    s.source.full_content =
                        truncate_chars(&s.source.full_content, budget).to_string();
                    s
                })
                .collect(),
            images: images.to_vec(),
        };
        match protocol::encode_sources(&payload) {
            Ok(block) => self.sink.emit(block),
            Err(e) => tracing::warn!(error = %e, "sources block did not encode"),
        }
    }

    /// Status events emitted so far, in order.
    pub fn emitted(&self) -> Vec<ProgressEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webground_core::stream::{ProgressView, StreamParser};
    use webground_core::{OrganicResult, ScrapeMethod, ScrapedSource, Stage};

    fn ranked(i: usize, content: &str, budget: usize) -> RankedSource {
        RankedSource {
            source: ScrapedSource {
                result: OrganicResult {
                    title: format!("t{i}"),
                    url: format!("https://example.com/{i}"),
                    snippet: "s".to_string(),
                    rank: i,
                },
                full_content: content.to_string(),
                scrape_method: ScrapeMethod::Jina,
                content_char_budget: budget,
            },
            relevance_score: 0.5,
            display_index: i,
        }
    }

    #[test]
    fn regressions_are_dropped() {
        let sink = Arc::new(VecSink::new());
        let p = ProgressEmitter::new(sink.clone());
        assert!(p.searching());
        assert!(p.reading(0, 5));
        assert!(p.reading(3, 5));
        assert!(!p.reading(2, 5));
        assert!(!p.searching());
        assert!(p.analyzing());
        assert!(!p.reading(5, 5));

        let stages: Vec<_> = p.emitted().iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::Searching, Stage::Reading, Stage::Reading, Stage::Analyzing]
        );
        assert_eq!(sink.blocks().len(), 4);
        assert_eq!(
            sink.blocks()[1],
            r#"<status>{"stage":"reading","total":5,"completed":0}</status>"#
        );
    }

    #[test]
    fn sources_block_truncates_to_budget_and_parses_back() {
        let sink = Arc::new(VecSink::new());
        let p = ProgressEmitter::new(sink.clone());
        p.searching();
        p.sources(&[ranked(1, "abcdefghij", 4), ranked(2, "<b>x</b>", 100)], &[]);

        let mut parser = StreamParser::new();
        parser.feed(&sink.joined());
        assert_eq!(parser.sources().len(), 2);
        assert_eq!(parser.sources()[0].source.full_content, "abcd");
        assert_eq!(parser.sources()[1].source.full_content, "<b>x</b>");
        assert_eq!(parser.progress(), ProgressView::Searching);
        assert_eq!(parser.display_text(), "");
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order_and_survives_closed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let p = ProgressEmitter::new(Arc::new(ChannelSink::new(tx)));
        p.searching();
        p.reading(0, 1);
        assert!(rx.recv().await.unwrap().contains("searching"));
        assert!(rx.recv().await.unwrap().contains("reading"));
        drop(rx);
        assert!(p.analyzing());
    }
}
