//! Public facade crate for `perplexica-pipe`.
//!
//! This crate contains no IO or backend-specific logic.
//! It re-exports the host-agnostic types/traits from `perplexica-pipe-core`.

pub use perplexica_pipe_core::*;
