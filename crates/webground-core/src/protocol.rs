//! Control blocks embedded in the generator's text stream.
//!
//! A block is `<tag>` + JSON + `</tag>`. Payload JSON is written with `<`
//! escaped as `\u003c`, so a payload can never contain its own closing tag.

use crate::{Error, ImageResult, ProgressEvent, RankedSource, Result, SearchMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Status,
    Sources,
    ToolCall,
    Think,
}

impl TagKind {
    pub const ALL: [TagKind; 4] = [
        TagKind::Status,
        TagKind::Sources,
        TagKind::ToolCall,
        TagKind::Think,
    ];

    pub fn open(self) -> &'static str {
        match self {
            Self::Status => "<status>",
            Self::Sources => "<sources>",
            Self::ToolCall => "<tool_call>",
            Self::Think => "<think>",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            Self::Status => "</status>",
            Self::Sources => "</sources>",
            Self::ToolCall => "</tool_call>",
            Self::Think => "</think>",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesPayload {
    #[serde(default)]
    pub sources: Vec<RankedSource>,
    #[serde(default)]
    pub images: Vec<ImageResult>,
}

fn encode_block<T: Serialize>(kind: TagKind, payload: &T) -> Result<String> {
    let js = serde_json::to_string(payload).map_err(|e| Error::Parse(e.to_string()))?;
    Ok(format!(
        "{}{}{}",
        kind.open(),
        js.replace('<', "\\u003c"),
        kind.close()
    ))
}

pub fn encode_status(ev: &ProgressEvent) -> Result<String> {
    encode_block(TagKind::Status, ev)
}

pub fn encode_sources(payload: &SourcesPayload) -> Result<String> {
    encode_block(TagKind::Sources, payload)
}

pub fn decode_status(body: &str) -> Result<ProgressEvent> {
    serde_json::from_str(body.trim()).map_err(|e| Error::Parse(e.to_string()))
}

pub fn decode_sources(body: &str) -> Result<SourcesPayload> {
    serde_json::from_str(body.trim()).map_err(|e| Error::Parse(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResearchParams {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SearchMode>,
}

/// Operations a generator may request inside `<tool_call>` blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    WebResearch(WebResearchParams),
    Unknown {
        name: String,
        params: serde_json::Value,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    params: serde_json::Value,
}

impl ToolCall {
    pub fn name(&self) -> &str {
        match self {
            Self::WebResearch(_) => "web_research",
            Self::Unknown { name, .. } => name,
        }
    }

    pub fn parse(body: &str) -> Result<Self> {
        let raw: RawToolCall =
            serde_json::from_str(body.trim()).map_err(|e| Error::Parse(e.to_string()))?;
        match raw.name.as_str() {
            "web_research" => serde_json::from_value(raw.params)
                .map(Self::WebResearch)
                .map_err(|e| Error::Parse(format!("web_research params: {e}"))),
            _ => Ok(Self::Unknown {
                name: raw.name,
                params: raw.params,
            }),
        }
    }

    pub fn encode(&self) -> Result<String> {
        let raw = match self {
            Self::WebResearch(p) => RawToolCall {
                name: "web_research".to_string(),
                params: serde_json::to_value(p).map_err(|e| Error::Parse(e.to_string()))?,
            },
            Self::Unknown { name, params } => RawToolCall {
                name: name.clone(),
                params: params.clone(),
            },
        };
        encode_block(TagKind::ToolCall, &raw)
    }
}
