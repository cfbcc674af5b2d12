//! Shared types, error model, configuration, and retry policy for docvec.
//!
//! This crate is the foundation depended on by all other docvec crates.
//! It provides:
//! - [`PipelineError`] — the unified error type
//! - Domain types ([`DocumentPage`], [`TextChunk`], [`Embedding`], [`VectorRecord`])
//! - Environment-driven configuration ([`PipelineConfig`])
//! - The exponential-backoff retry helper shared by every network-touching stage

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{PipelineConfig, load_config};
pub use error::{PipelineError, Result};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use types::{
    ChunkMetadata, DocumentPage, Embedding, EmbeddingRecord, REQUIRED_PAYLOAD_FIELDS, TextChunk,
    VectorRecord,
};
