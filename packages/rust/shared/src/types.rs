//! Core domain types for the ingestion pipeline.
//!
//! Construction is validated: a value of one of these types satisfies its
//! invariants (hash matches text, vector length matches the model dimension,
//! payload carries every required key) or it does not exist.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Payload keys every vector-store record must carry.
pub const REQUIRED_PAYLOAD_FIELDS: [&str; 8] = [
    "text",
    "url",
    "title",
    "chunk_index",
    "total_chunks",
    "token_count",
    "model",
    "created_at",
];

/// Maximum stored title length in characters.
const MAX_TITLE_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// DocumentPage
// ---------------------------------------------------------------------------

/// One crawled and extracted documentation page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    /// Canonical page URL; the page's identity.
    pub url: String,
    /// Page title, truncated to 500 characters.
    pub title: String,
    /// Whitespace-normalized body text.
    pub extracted_text: String,
    /// When the page was fetched.
    pub crawled_at: DateTime<Utc>,
    /// SHA-256 of `extracted_text`, hex-encoded.
    pub content_hash: String,
    /// Free-form string metadata carried into chunk payloads.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DocumentPage {
    /// Build a page, computing `content_hash` from the text.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        extracted_text: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self> {
        let url = url.into();
        let title: String = title.into();
        let extracted_text = extracted_text.into();

        if extracted_text.trim().is_empty() {
            return Err(PipelineError::validation(format!(
                "extracted_text cannot be empty for {url}"
            )));
        }
        if title.trim().is_empty() {
            return Err(PipelineError::validation(format!(
                "title cannot be empty for {url}"
            )));
        }

        let title = truncate_chars(&title, MAX_TITLE_CHARS);
        let content_hash = sha256_hex(&extracted_text);

        Ok(Self {
            url,
            title,
            extracted_text,
            crawled_at: Utc::now(),
            content_hash,
            metadata,
        })
    }

    /// Rebuild a page from its cached text and sidecar metadata, keeping the
    /// recorded timestamp and hash.
    pub fn from_cache(
        url: impl Into<String>,
        title: impl Into<String>,
        extracted_text: impl Into<String>,
        crawled_at: DateTime<Utc>,
        content_hash: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut page = Self::new(url, title, extracted_text, metadata)?;
        page.crawled_at = crawled_at;
        let content_hash = content_hash.into();
        if !content_hash.is_empty() {
            page.content_hash = content_hash;
        }
        Ok(page)
    }

    /// Short stable hash of the URL, used for cache file names.
    pub fn url_hash(&self) -> String {
        url_hash(&self.url)
    }
}

/// First 16 hex characters of SHA-256 over a URL.
pub fn url_hash(url: &str) -> String {
    sha256_hex(url)[..16].to_string()
}

/// Full SHA-256 hex digest of a string.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// TextChunk
// ---------------------------------------------------------------------------

/// One unit of embedding input: a bounded span of a page's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// `first16(md5(url))_<index>`; stable across reruns.
    pub chunk_id: String,
    /// Chunk text (at least 10 characters).
    pub text: String,
    /// URL of the source page.
    pub source_url: String,
    /// Title of the source page.
    pub source_title: String,
    /// Position of this chunk within the page.
    pub chunk_index: usize,
    /// Number of chunks produced from the page.
    pub total_chunks: usize,
    /// Approximate token count (4 characters per token).
    pub token_count: usize,
    /// Character offset of the chunk start in the page text.
    pub char_start: usize,
    /// Character offset one past the chunk end.
    pub char_end: usize,
    /// Metadata inherited from the page (always carries `content_hash`).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TextChunk {
    /// Stable chunk identifier for a URL and index.
    pub fn generate_id(url: &str, chunk_index: usize) -> String {
        let mut hasher = Md5::new();
        hasher.update(url.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}_{chunk_index}", &digest[..16])
    }

    /// Validated constructor enforcing every chunk invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        text: impl Into<String>,
        source_url: impl Into<String>,
        source_title: impl Into<String>,
        chunk_index: usize,
        total_chunks: usize,
        token_count: usize,
        char_start: usize,
        char_end: usize,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self> {
        let text = text.into();
        let source_url = source_url.into();

        if text.chars().count() < 10 {
            return Err(PipelineError::validation(format!(
                "chunk text must be at least 10 characters, got {}",
                text.chars().count()
            )));
        }
        if total_chunks == 0 || chunk_index >= total_chunks {
            return Err(PipelineError::validation(format!(
                "chunk_index {chunk_index} out of range for total_chunks {total_chunks}"
            )));
        }
        if token_count == 0 {
            return Err(PipelineError::validation("token_count must be at least 1"));
        }
        if char_end <= char_start {
            return Err(PipelineError::validation(format!(
                "char_end {char_end} must be greater than char_start {char_start}"
            )));
        }

        Ok(Self {
            chunk_id: Self::generate_id(&source_url, chunk_index),
            text,
            source_url,
            source_title: source_title.into(),
            chunk_index,
            total_chunks,
            token_count,
            char_start,
            char_end,
            metadata,
        })
    }
}

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

/// A fixed-dimension vector produced for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Identifier of the originating chunk.
    pub chunk_id: String,
    /// Dense vector; length always equals the configured dimension.
    pub vector: Vec<f32>,
    /// Provider model identifier.
    pub model: String,
    /// When the vector was generated.
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    /// Build an embedding, rejecting any vector of the wrong length.
    pub fn new(
        chunk_id: impl Into<String>,
        vector: Vec<f32>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        if vector.len() != dimensions {
            return Err(PipelineError::Provider(format!(
                "vector must have {dimensions} dimensions, got {}",
                vector.len()
            )));
        }
        Ok(Self {
            chunk_id: chunk_id.into(),
            vector,
            model: model.into(),
            created_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// EmbeddingRecord (JSONL handoff form)
// ---------------------------------------------------------------------------

/// Chunk-derived metadata carried alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub text: String,
    pub url: String,
    pub title: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub token_count: usize,
    /// Extra page metadata (e.g. `content_hash`), flattened into the object.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// One line of the embeddings JSONL file: a vector plus its chunk metadata.
///
/// This is the on-disk pairing of a chunk with its embedding; the uploader
/// reads these back without needing the original [`TextChunk`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub metadata: ChunkMetadata,
}

impl EmbeddingRecord {
    /// Pair a chunk with its embedding.
    pub fn from_parts(chunk: &TextChunk, embedding: &Embedding) -> Self {
        Self {
            chunk_id: embedding.chunk_id.clone(),
            vector: embedding.vector.clone(),
            model: embedding.model.clone(),
            created_at: embedding.created_at,
            metadata: ChunkMetadata {
                text: chunk.text.clone(),
                url: chunk.source_url.clone(),
                title: chunk.source_title.clone(),
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                token_count: chunk.token_count,
                extra: chunk.metadata.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// VectorRecord
// ---------------------------------------------------------------------------

/// Store-bound form of an embedding: point id, vector, and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Deterministic point identifier (UUIDv5 over the chunk id).
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl VectorRecord {
    /// Deterministic store identifier for a chunk id.
    ///
    /// The store accepts only integers or UUIDs as point ids, so the chunk id
    /// is folded through UUIDv5; the same chunk always maps to the same point,
    /// which is what makes re-uploads idempotent.
    pub fn point_id(chunk_id: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_id.as_bytes())
    }

    /// Validated constructor: checks the vector dimension and that every
    /// required payload key is present.
    pub fn new(
        id: Uuid,
        vector: Vec<f32>,
        payload: serde_json::Map<String, serde_json::Value>,
        dimensions: usize,
    ) -> Result<Self> {
        if vector.len() != dimensions {
            return Err(PipelineError::validation(format!(
                "vector must have {dimensions} dimensions, got {}",
                vector.len()
            )));
        }
        let missing: Vec<&str> = REQUIRED_PAYLOAD_FIELDS
            .iter()
            .filter(|field| !payload.contains_key(**field))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::validation(format!(
                "missing required payload fields: {missing:?}"
            )));
        }
        Ok(Self {
            id,
            vector,
            payload,
        })
    }

    /// Build the store record for one JSONL embedding record.
    pub fn from_record(record: &EmbeddingRecord, dimensions: usize) -> Result<Self> {
        let meta = &record.metadata;
        let mut payload = serde_json::Map::new();
        payload.insert("text".into(), meta.text.clone().into());
        payload.insert("url".into(), meta.url.clone().into());
        payload.insert("title".into(), meta.title.clone().into());
        payload.insert("chunk_index".into(), meta.chunk_index.into());
        payload.insert("total_chunks".into(), meta.total_chunks.into());
        payload.insert("token_count".into(), meta.token_count.into());
        payload.insert("model".into(), record.model.clone().into());
        payload.insert("created_at".into(), record.created_at.to_rfc3339().into());
        for (key, value) in &meta.extra {
            payload.insert(key.clone(), value.clone().into());
        }

        Self::new(
            Self::point_id(&record.chunk_id),
            record.vector.clone(),
            payload,
            dimensions,
        )
    }
}
