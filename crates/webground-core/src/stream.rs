//! Client-side recovery of control blocks from the generator's raw output.
//!
//! The parser keeps the whole turn in a buffer and a cursor to the last
//! confirmed boundary. Everything before the cursor is final: plain text has
//! been copied to the display text and complete blocks have been applied.
//! Everything after it is a possibly-incomplete tail that is re-examined when
//! more bytes arrive. Because the cursor only moves past bytes whose meaning
//! cannot change, the result is the same as rescanning the full buffer on
//! every chunk, and the same for any chunking of the input.

use crate::protocol::{self, SourcesPayload, TagKind, ToolCall};
use crate::{ImageResult, ProgressEvent, RankedSource, Stage};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorChunk {
    Token(String),
    /// Terminal sentinel for the turn.
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Status(ProgressEvent),
    Sources(SourcesPayload),
    ToolCall(ToolCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum ProgressView {
    Idle,
    Searching,
    Reading { completed: usize, total: usize },
    Analyzing,
    Done,
}

impl ProgressView {
    fn from_event(ev: &ProgressEvent) -> Self {
        match ev.stage {
            Stage::Searching => Self::Searching,
            Stage::Reading => Self::Reading {
                completed: ev.completed.unwrap_or(0),
                total: ev.total.unwrap_or(0),
            },
            Stage::Analyzing => Self::Analyzing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutput {
    pub text: String,
    pub progress: ProgressView,
    pub sources: Vec<RankedSource>,
    pub images: Vec<ImageResult>,
    pub tool_calls: Vec<ToolCall>,
    /// Complete blocks whose payload failed to parse.
    pub discarded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clear,
    /// Text at the cursor that may still become an opening tag.
    Prefix,
    /// Open tag at the cursor; its closing tag was not found before `searched`.
    Block { kind: TagKind, searched: usize },
}

#[derive(Debug)]
pub struct StreamParser {
    buffer: String,
    cursor: usize,
    clean: String,
    tail: Tail,
    last_status: Option<ProgressEvent>,
    sources: Vec<RankedSource>,
    images: Vec<ImageResult>,
    tool_calls: Vec<ToolCall>,
    discarded: usize,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            clean: String::new(),
            tail: Tail::Clear,
            last_status: None,
            sources: Vec::new(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            discarded: 0,
        }
    }

    /// Appends a chunk and returns the blocks it completed, in stream order.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        self.scan()
    }

    /// Clean display text so far (control blocks and any pending tail removed).
    pub fn display_text(&self) -> &str {
        &self.clean
    }

    pub fn progress(&self) -> ProgressView {
        self.last_status
            .as_ref()
            .map(ProgressView::from_event)
            .unwrap_or(ProgressView::Idle)
    }

    pub fn sources(&self) -> &[RankedSource] {
        &self.sources
    }

    pub fn images(&self) -> &[ImageResult] {
        &self.images
    }

    pub fn raw_len(&self) -> usize {
        self.buffer.len()
    }

    /// Handles one transport item; returns the finished turn on the sentinel.
    pub fn handle(&mut self, chunk: GeneratorChunk) -> (Vec<StreamEvent>, Option<TurnOutput>) {
        match chunk {
            GeneratorChunk::Token(t) => (self.feed(&t), None),
            GeneratorChunk::Done => {
                let events = self.scan();
                (events, Some(self.finish()))
            }
        }
    }

    /// Ends the turn (sentinel or channel close) and resets for the next one.
    pub fn finish(&mut self) -> TurnOutput {
        self.scan();
        match self.tail {
            Tail::Prefix => {
                let rest = self.buffer[self.cursor..].to_string();
                self.clean.push_str(&rest);
            }
            // An unterminated control block is never prose.
            Tail::Block { .. } | Tail::Clear => {}
        }
        let progress = match self.last_status {
            Some(_) => ProgressView::Done,
            None => ProgressView::Idle,
        };
        let done = std::mem::take(self);
        TurnOutput {
            text: done.clean,
            progress,
            sources: done.sources,
            images: done.images,
            tool_calls: done.tool_calls,
            discarded: done.discarded,
        }
    }

    fn scan(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        loop {
            if let Tail::Block { kind, searched } = self.tail {
                let body_start = self.cursor + kind.open().len();
                let close = kind.close();
                // Resume just far enough back to catch a closing tag split across chunks.
                let from = searched
                    .saturating_sub(close.len().saturating_sub(1))
                    .max(body_start);
                let from = floor_char_boundary(&self.buffer, from);
                match self.buffer[from..].find(close) {
                    Some(rel) => {
                        let body_end = from + rel;
                        let body = self.buffer[body_start..body_end].to_string();
                        self.cursor = body_end + close.len();
                        self.tail = Tail::Clear;
                        if let Some(ev) = self.apply(kind, &body) {
                            events.push(ev);
                        }
                        continue;
                    }
                    None => {
                        self.tail = Tail::Block {
                            kind,
                            searched: self.buffer.len(),
                        };
                        break;
                    }
                }
            }

            let rest = &self.buffer[self.cursor..];
            let Some(lt) = rest.find('<') else {
                self.clean.push_str(rest);
                self.cursor = self.buffer.len();
                self.tail = Tail::Clear;
                break;
            };
            self.clean.push_str(&rest[..lt]);
            self.cursor += lt;

            let rest = &self.buffer[self.cursor..];
            if let Some(kind) = TagKind::ALL.iter().copied().find(|k| rest.starts_with(k.open())) {
                self.tail = Tail::Block {
                    kind,
                    searched: self.cursor + kind.open().len(),
                };
                continue;
            }
            if TagKind::ALL.iter().any(|k| k.open().starts_with(rest)) {
                self.tail = Tail::Prefix;
                break;
            }
            self.clean.push('<');
            self.cursor += 1;
            self.tail = Tail::Clear;
        }
        events
    }

    fn apply(&mut self, kind: TagKind, body: &str) -> Option<StreamEvent> {
        match kind {
            TagKind::Status => match protocol::decode_status(body) {
                Ok(ev) => {
                    self.last_status = Some(ev.clone());
                    Some(StreamEvent::Status(ev))
                }
                Err(_) => {
                    self.discarded += 1;
                    None
                }
            },
            TagKind::Sources => match protocol::decode_sources(body) {
                Ok(p) => {
                    self.sources = p.sources.clone();
                    self.images = p.images.clone();
                    Some(StreamEvent::Sources(p))
                }
                Err(_) => {
                    self.discarded += 1;
                    None
                }
            },
            TagKind::ToolCall => match ToolCall::parse(body) {
                Ok(tc) => {
                    self.tool_calls.push(tc.clone());
                    Some(StreamEvent::ToolCall(tc))
                }
                Err(_) => {
                    self.discarded += 1;
                    None
                }
            },
            TagKind::Think => None,
        }
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_sources, encode_status};
    use crate::{OrganicResult, ScrapedSource};
    use proptest::prelude::*;

    fn source(i: usize) -> RankedSource {
        RankedSource {
            source: ScrapedSource::from_snippet(OrganicResult {
                title: format!("T{i}"),
                url: format!("https://example.com/{i}"),
                snippet: format!("s{i}"),
                rank: i,
            }),
            relevance_score: 0.5,
            display_index: i,
        }
    }

    fn transcript() -> String {
        let mut raw = String::new();
        raw.push_str(&encode_status(&ProgressEvent::searching()).unwrap());
        raw.push_str("Let me look that up. ");
        for c in 0..=3 {
            raw.push_str(&encode_status(&ProgressEvent::reading(c, 3)).unwrap());
        }
        raw.push_str("<think>weighing sources</think>");
        raw.push_str(&encode_status(&ProgressEvent::analyzing()).unwrap());
        raw.push_str(
            &encode_sources(&SourcesPayload {
                sources: (1..=3).map(source).collect(),
                images: Vec::new(),
            })
            .unwrap(),
        );
        raw.push_str("Rates held at 5% [1]. Note a < b and <b>bold</b>.");
        raw
    }

    fn run(chunks: &[&str]) -> TurnOutput {
        let mut p = StreamParser::new();
        for c in chunks {
            p.feed(c);
        }
        p.finish()
    }

    #[test]
    fn strips_blocks_and_tracks_state() {
        let out = run(&[&transcript()]);
        assert_eq!(
            out.text,
            "Let me look that up. Rates held at 5% [1]. Note a < b and <b>bold</b>."
        );
        assert_eq!(out.progress, ProgressView::Done);
        assert_eq!(out.sources.len(), 3);
        assert_eq!(out.discarded, 0);
    }

    #[test]
    fn unterminated_tail_is_hidden_until_complete() {
        let mut p = StreamParser::new();
        p.feed("Hello <stat");
        assert_eq!(p.display_text(), "Hello ");
        p.feed("us>{\"stage\":\"read");
        assert_eq!(p.display_text(), "Hello ");
        assert_eq!(p.progress(), ProgressView::Idle);
        let evs = p.feed("ing\",\"total\":2,\"completed\":1}</sta");
        assert!(evs.is_empty());
        let evs = p.feed("tus> world");
        assert_eq!(evs.len(), 1);
        assert_eq!(p.display_text(), "Hello  world");
        assert_eq!(
            p.progress(),
            ProgressView::Reading {
                completed: 1,
                total: 2
            }
        );
    }

    #[test]
    fn malformed_json_keeps_prior_state() {
        let mut p = StreamParser::new();
        p.feed(&encode_status(&ProgressEvent::reading(2, 5)).unwrap());
        p.feed("<status>{\"stage\":</status>");
        assert_eq!(
            p.progress(),
            ProgressView::Reading {
                completed: 2,
                total: 5
            }
        );
        p.feed("<sources>[oops</sources>");
        let out = p.finish();
        assert_eq!(out.discarded, 2);
        assert!(out.sources.is_empty());
        assert_eq!(out.text, "");
    }

    #[test]
    fn last_sources_block_supersedes_earlier() {
        let first = encode_sources(&SourcesPayload {
            sources: vec![source(1)],
            images: Vec::new(),
        })
        .unwrap();
        let second = encode_sources(&SourcesPayload {
            sources: vec![source(1), source(2)],
            images: Vec::new(),
        })
        .unwrap();
        let out = run(&[&first, "mid ", &second]);
        assert_eq!(out.sources.len(), 2);
        assert_eq!(out.text, "mid ");
    }

    #[test]
    fn finish_releases_prefix_but_drops_open_block() {
        let out = run(&["a <thi"]);
        assert_eq!(out.text, "a <thi");
        let out = run(&["a <think>never closed"]);
        assert_eq!(out.text, "a ");
    }

    #[test]
    fn finish_resets_for_next_turn() {
        let mut p = StreamParser::new();
        p.feed(&encode_status(&ProgressEvent::searching()).unwrap());
        p.feed("one");
        let first = p.finish();
        assert_eq!(first.text, "one");
        assert_eq!(p.raw_len(), 0);
        assert_eq!(p.progress(), ProgressView::Idle);
        p.feed("two");
        let second = p.finish();
        assert_eq!(second.text, "two");
        assert_eq!(second.progress, ProgressView::Idle);
    }

    #[test]
    fn tool_calls_are_recovered_and_stripped() {
        let mut p = StreamParser::new();
        let (evs, turn) = p.handle(GeneratorChunk::Token(
            "x<tool_call>{\"name\":\"web_research\",\"params\":{\"query\":\"q\"}}</tool_call>y"
                .to_string(),
        ));
        assert!(turn.is_none());
        assert!(matches!(evs.as_slice(), [StreamEvent::ToolCall(ToolCall::WebResearch(_))]));
        let (_, turn) = p.handle(GeneratorChunk::Done);
        let turn = turn.unwrap();
        assert_eq!(turn.text, "xy");
        assert_eq!(turn.tool_calls.len(), 1);
    }

    #[test]
    fn close_tag_split_across_many_chunks() {
        let raw = encode_status(&ProgressEvent::analyzing()).unwrap();
        let chunks: Vec<String> = raw.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chunks.iter().map(|s| s.as_str()).collect();
        let out = run(&refs);
        assert_eq!(out.text, "");
        assert_eq!(out.progress, ProgressView::Done);
    }

    fn split_at_points(s: &str, points: &[usize]) -> Vec<String> {
        let mut cuts: Vec<usize> = points
            .iter()
            .map(|p| floor_char_boundary(s, p % (s.len() + 1)))
            .collect();
        cuts.push(0);
        cuts.push(s.len());
        cuts.sort_unstable();
        cuts.dedup();
        cuts.windows(2).map(|w| s[w[0]..w[1]].to_string()).collect()
    }

    fn fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z <>/é]{0,12}",
            Just(encode_status(&ProgressEvent::reading(1, 4)).unwrap()),
            Just(encode_status(&ProgressEvent::analyzing()).unwrap()),
            Just("<status>{broken</status>".to_string()),
            Just("<think>hmm <status></think>".to_string()),
            Just("<sta".to_string()),
            Just("</status>".to_string()),
            Just(
                encode_sources(&SourcesPayload {
                    sources: vec![source(7)],
                    images: Vec::new(),
                })
                .unwrap()
            ),
        ]
    }

    proptest! {
        #[test]
        fn output_is_independent_of_chunking(
            parts in prop::collection::vec(fragment(), 0..12),
            points in prop::collection::vec(any::<usize>(), 0..16),
        ) {
            let raw: String = parts.concat();
            let whole = run(&[&raw]);
            let chunks = split_at_points(&raw, &points);
            let refs: Vec<&str> = chunks.iter().map(|s| s.as_str()).collect();
            let split = run(&refs);
            prop_assert_eq!(whole, split);
        }

        #[test]
        fn display_text_only_grows(
            parts in prop::collection::vec(fragment(), 0..8),
            points in prop::collection::vec(any::<usize>(), 0..8),
        ) {
            let raw: String = parts.concat();
            let mut p = StreamParser::new();
            let mut prev = String::new();
            for c in split_at_points(&raw, &points) {
                p.feed(&c);
                prop_assert!(p.display_text().starts_with(&prev));
                prev = p.display_text().to_string();
            }
        }
    }
}
