//! Public facade crate for `webground`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `webground-core`.

pub use webground_core::*;
