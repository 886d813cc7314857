//! `webground-mcp` crate (library surface).
//!
//! The primary entrypoint is the `webground` binary (CLI + MCP stdio). This
//! module re-exports the pipeline crates for embedding.

pub use webground_core as core;
pub use webground_local as local;
