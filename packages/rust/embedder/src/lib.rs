//! Cohere embedding client.
//!
//! Turns chunks into fixed-dimension vectors through the Cohere v2 `/embed`
//! endpoint under a requests-per-minute budget. Batches append to the
//! embeddings JSONL file as they complete, so a failed batch never loses the
//! ones before it.

pub mod jsonl;

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use docvec_shared::{
    Embedding, EmbeddingRecord, PipelineConfig, PipelineError, Result, RetryPolicy, TextChunk,
    retry_with_backoff,
};
use docvec_state::{EmbedState, StateManager};

/// Request timeout; embedding batches can be slow to compute.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Input type for ingestion-time embeddings.
pub const INPUT_TYPE_DOCUMENT: &str = "search_document";

/// Input type for query-time embeddings (the retrieval contract).
pub const INPUT_TYPE_QUERY: &str = "search_query";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: EmbeddingsField,
}

/// Cohere returns either a bare list of vectors or an object keyed by
/// encoding (`{"float": [[...], ...]}`); both preserve input order.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingsField {
    List(Vec<Vec<f32>>),
    Keyed { float: Vec<Vec<f32>> },
}

impl EmbeddingsField {
    fn into_vectors(self) -> Vec<Vec<f32>> {
        match self {
            Self::List(vectors) | Self::Keyed { float: vectors } => vectors,
        }
    }
}

/// Summary of one embedding run.
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    /// Chunks embedded during this run.
    pub embedded: usize,
    /// Chunks skipped because a previous run already processed them.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// CohereEmbedder
// ---------------------------------------------------------------------------

/// Batched embedding client with an RPM budget and resumable output.
pub struct CohereEmbedder {
    config: PipelineConfig,
    client: Client,
}

impl CohereEmbedder {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    /// Embed a batch of texts, in input order.
    ///
    /// Transport errors and 408/429/5xx are retried (max 5, base 2 s, cap
    /// 60 s); any other non-success status, an unexpected body shape, or a
    /// vector of the wrong length is a [`PipelineError::Provider`] and fails
    /// immediately.
    pub async fn embed_texts(&self, texts: &[String], input_type: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let policy = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(60));
        let vectors = retry_with_backoff(policy, "embed_texts", || async move {
            let response = self
                .client
                .post(&self.config.cohere_api_url)
                .bearer_auth(&self.config.cohere_api_key)
                .json(&EmbedRequest {
                    model: &self.config.cohere_model,
                    texts,
                    input_type,
                })
                .send()
                .await
                .map_err(|e| {
                    PipelineError::Network(format!("{}: {e}", self.config.cohere_api_url))
                })?;

            let status = response.status();
            if !status.is_success() {
                let code = status.as_u16();
                let body = response.text().await.unwrap_or_default();
                if matches!(code, 408 | 429 | 500..=599) {
                    return Err(PipelineError::Http {
                        status: code,
                        url: self.config.cohere_api_url.clone(),
                    });
                }
                return Err(PipelineError::Provider(format!(
                    "HTTP {code}: {}",
                    body.trim()
                )));
            }

            let parsed: EmbedResponse = response
                .json()
                .await
                .map_err(|e| PipelineError::Provider(format!("unexpected response body: {e}")))?;
            Ok(parsed.embeddings.into_vectors())
        })
        .await?;

        if vectors.len() != texts.len() {
            return Err(PipelineError::Provider(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let dimensions = self.config.embedding_dimensions();
        for vector in &vectors {
            if vector.len() != dimensions {
                return Err(PipelineError::Provider(format!(
                    "vector must have {dimensions} dimensions, got {}",
                    vector.len()
                )));
            }
        }

        Ok(vectors)
    }

    /// Embed a single query with `input_type="search_query"`.
    ///
    /// This is the embedding half of the retrieval read interface; ingestion
    /// uses `search_document`.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_texts(&texts, INPUT_TYPE_QUERY).await?;
        vectors
            .pop()
            .ok_or_else(|| PipelineError::Provider("empty embedding response".into()))
    }

    /// Embed chunks in batches, appending each completed batch to the
    /// embeddings JSONL file and recording it in the embed state.
    ///
    /// A batch failure after retries is fatal for the run; records from
    /// earlier batches stay on disk and are skipped on resume.
    #[instrument(skip_all, fields(chunks = chunks.len(), resume))]
    pub async fn embed_chunks(
        &self,
        chunks: &[TextChunk],
        states: &StateManager,
        resume: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<EmbedOutcome> {
        let mut state = if resume {
            states.load_embed()
        } else {
            jsonl::remove_if_exists(&self.config.embeddings_path)?;
            EmbedState::default()
        };

        let pending: Vec<&TextChunk> = chunks
            .iter()
            .filter(|c| !state.is_processed(&c.chunk_id))
            .collect();
        let skipped = chunks.len() - pending.len();

        state.total_chunks = chunks.len();
        state.batch_size = self.config.cohere_batch_size;
        states.save_embed(&state)?;

        info!(
            pending = pending.len(),
            skipped,
            batch_size = self.config.cohere_batch_size,
            "starting embedding"
        );

        let delay = self.config.embed_batch_delay();
        let total = pending.len();
        let mut embedded = 0usize;

        for batch in pending.chunks(self.config.cohere_batch_size.max(1)) {
            // Stay inside the provider's RPM budget.
            tokio::time::sleep(delay).await;

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_texts(&texts, INPUT_TYPE_DOCUMENT).await?;

            let mut records = Vec::with_capacity(batch.len());
            for (chunk, vector) in batch.iter().zip(vectors) {
                let embedding = Embedding::new(
                    chunk.chunk_id.clone(),
                    vector,
                    self.config.cohere_model.clone(),
                    self.config.embedding_dimensions(),
                )?;
                records.push(EmbeddingRecord::from_parts(chunk, &embedding));
            }

            jsonl::append_records(&self.config.embeddings_path, &records)?;

            let ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();
            state.mark_processed(&ids);
            states.save_embed(&state)?;

            embedded += batch.len();
            progress(embedded, total);
            debug!(embedded, total, "batch embedded");
        }

        info!(embedded, skipped, "embedding complete");
        Ok(EmbedOutcome { embedded, skipped })
    }
}
