//! Qdrant vector store client.
//!
//! Talks to Qdrant over its REST API: ensures the collection exists with the
//! right dimension and cosine distance (plus a keyword index on `url` for
//! per-page filtering), upserts vectors in batches with a per-record fallback,
//! and serves the top-K search used by the QA layer.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use docvec_shared::{
    EmbeddingRecord, PipelineConfig, PipelineError, Result, RetryPolicy, VectorRecord,
    retry_with_backoff,
};
use docvec_state::{StateManager, UploadState};

/// Records per upsert request.
const DEFAULT_BATCH_SIZE: usize = 100;

/// Request timeout for store calls.
const REQUEST_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

/// One search result with its payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    /// Point identifier as the store returns it (UUID string here).
    pub id: serde_json::Value,
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Summary of one upload run.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Chunk ids uploaded during this run.
    pub uploaded: Vec<String>,
    /// Chunk ids that failed permanently, with their errors.
    pub failed: BTreeMap<String, String>,
    /// Records skipped because a previous run already uploaded them.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// QdrantStore
// ---------------------------------------------------------------------------

/// Client for one Qdrant collection.
pub struct QdrantStore {
    config: PipelineConfig,
    client: Client,
    base_url: String,
    batch_size: usize,
}

impl QdrantStore {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
            base_url: config.qdrant_url.trim_end_matches('/').to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Override the upsert batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.client.request(method, url);
        if !self.config.qdrant_api_key.is_empty() {
            builder = builder.header("api-key", &self.config.qdrant_api_key);
        }
        builder
    }

    /// Issue a request, mapping transport errors and non-success statuses.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("{}{path}: {e}", self.base_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Http {
                status: status.as_u16(),
                url: format!("{}{path}", self.base_url),
            });
        }
        Ok(response)
    }

    /// Check the store is reachable.
    pub async fn connect(&self) -> Result<()> {
        self.send(self.request(Method::GET, "/collections"), "/collections")
            .await?;
        debug!("connected to vector store");
        Ok(())
    }

    /// Ensure the collection exists with the configured dimension, cosine
    /// distance, and a keyword index on `url`. Returns whether it was created.
    #[instrument(skip_all, fields(collection = %self.config.qdrant_collection, recreate))]
    pub async fn ensure_collection(&self, recreate: bool) -> Result<bool> {
        let name = &self.config.qdrant_collection;
        let path = format!("/collections/{name}");

        let exists = match self.send(self.request(Method::GET, &path), &path).await {
            Ok(_) => true,
            Err(PipelineError::Http { status: 404, .. }) => false,
            Err(e) => return Err(e),
        };

        if exists {
            if !recreate {
                info!("collection exists");
                return Ok(false);
            }
            info!("deleting existing collection");
            self.send(self.request(Method::DELETE, &path), &path).await?;
        }

        info!(
            dimensions = self.config.embedding_dimensions(),
            "creating collection"
        );
        self.send(
            self.request(Method::PUT, &path).json(&json!({
                "vectors": {
                    "size": self.config.embedding_dimensions(),
                    "distance": "Cosine",
                }
            })),
            &path,
        )
        .await?;

        // Keyword index on `url` enables per-page filtering at query time.
        let index_path = format!("/collections/{name}/index");
        self.send(
            self.request(Method::PUT, &index_path).json(&json!({
                "field_name": "url",
                "field_schema": "keyword",
            })),
            &index_path,
        )
        .await?;

        Ok(true)
    }

    /// Upload embedding records in batches.
    ///
    /// A batch that fails after retries degrades to per-record upserts;
    /// records that still fail are returned in the outcome and the run
    /// continues. Point ids derive from `chunk_id`, so re-uploading the same
    /// records is idempotent.
    #[instrument(skip_all, fields(records = records.len(), resume))]
    pub async fn upload_embeddings(
        &self,
        records: &[EmbeddingRecord],
        states: &StateManager,
        resume: bool,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<UploadOutcome> {
        let mut state = if resume {
            states.load_upload()
        } else {
            UploadState::default()
        };

        let pending: Vec<&EmbeddingRecord> = records
            .iter()
            .filter(|r| !state.is_uploaded(&r.chunk_id))
            .collect();
        let skipped = records.len() - pending.len();

        state.total_vectors = records.len();
        state.batch_size = self.batch_size;
        states.save_upload(&state)?;

        info!(
            pending = pending.len(),
            skipped,
            batch_size = self.batch_size,
            "starting upload"
        );

        let dimensions = self.config.embedding_dimensions();
        let total = pending.len();
        let mut uploaded: Vec<String> = Vec::new();
        let mut failed: BTreeMap<String, String> = BTreeMap::new();

        for batch in pending.chunks(self.batch_size) {
            // Records that fail conversion (bad dimension, missing payload
            // key) are permanent per-record failures, not batch failures.
            let mut points: Vec<(String, VectorRecord)> = Vec::with_capacity(batch.len());
            for record in batch {
                match VectorRecord::from_record(record, dimensions) {
                    Ok(point) => points.push((record.chunk_id.clone(), point)),
                    Err(e) => {
                        warn!(chunk_id = %record.chunk_id, error = %e, "record rejected");
                        failed.insert(record.chunk_id.clone(), e.to_string());
                    }
                }
            }
            if points.is_empty() {
                continue;
            }

            let batch_records: Vec<&VectorRecord> = points.iter().map(|(_, p)| p).collect();
            match self.upsert(&batch_records).await {
                Ok(()) => {
                    let ids: Vec<String> = points.iter().map(|(id, _)| id.clone()).collect();
                    state.mark_uploaded(&ids);
                    uploaded.extend(ids);
                }
                Err(e) => {
                    warn!(error = %e, batch = batch_records.len(), "batch upload failed, falling back to per-record upserts");
                    for (chunk_id, point) in &points {
                        match self.upsert(&[point]).await {
                            Ok(()) => {
                                state.mark_uploaded(std::slice::from_ref(chunk_id));
                                uploaded.push(chunk_id.clone());
                            }
                            Err(e) => {
                                state.mark_failed(chunk_id, e.to_string());
                                failed.insert(chunk_id.clone(), e.to_string());
                            }
                        }
                    }
                }
            }

            states.save_upload(&state)?;
            progress(uploaded.len() + failed.len(), total);
        }

        states.save_upload(&state)?;

        info!(
            uploaded = uploaded.len(),
            failed = failed.len(),
            skipped,
            "upload complete"
        );

        Ok(UploadOutcome {
            uploaded,
            failed,
            skipped,
        })
    }

    /// Upsert a set of points under retry (max 5, base 1 s, cap 60 s).
    async fn upsert(&self, records: &[&VectorRecord]) -> Result<()> {
        let name = &self.config.qdrant_collection;
        let path = format!("/collections/{name}/points?wait=true");

        let points: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "vector": r.vector,
                    "payload": r.payload,
                })
            })
            .collect();
        let body = json!({ "points": points });

        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(60));
        retry_with_backoff(policy, "upsert_points", || {
            let body = &body;
            let path = &path;
            async move {
                self.send(self.request(Method::PUT, path).json(body), path)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    /// Exact point count, for post-upload verification.
    pub async fn count(&self) -> Result<u64> {
        let name = &self.config.qdrant_collection;
        let path = format!("/collections/{name}/points/count");

        let response = self
            .send(
                self.request(Method::POST, &path).json(&json!({"exact": true})),
                &path,
            )
            .await?;

        let parsed: CountResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Store(format!("count response: {e}")))?;
        Ok(parsed.result.count)
    }

    /// Top-K cosine search, optionally filtered to a single page URL.
    ///
    /// This is the read interface the QA layer consumes; payloads carry the
    /// fields written at upload time.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        url_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let name = &self.config.qdrant_collection;
        let path = format!("/collections/{name}/points/search");

        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(url) = url_filter {
            body["filter"] = json!({
                "must": [{ "key": "url", "match": { "value": url } }]
            });
        }

        let response = self
            .send(self.request(Method::POST, &path).json(&body), &path)
            .await?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Store(format!("search response: {e}")))?;
        Ok(parsed.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use docvec_shared::{ChunkMetadata, EmbeddingRecord};

    const DIMS: usize = 1024;

    fn test_config(server: &MockServer, dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            qdrant_url: server.uri(),
            qdrant_api_key: "qdrant-key".into(),
            ..PipelineConfig::default()
        }
        .with_data_root(dir)
    }

    fn record(i: usize) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk_id: format!("abcdef0123456789_{i}"),
            vector: vec![0.25; DIMS],
            model: "embed-english-v3.0".into(),
            created_at: chrono_now(),
            metadata: ChunkMetadata {
                text: format!("Chunk {i} text body."),
                url: "https://docs.example.com/guide".into(),
                title: "Guide".into(),
                chunk_index: i,
                total_chunks: 4,
                token_count: 5,
                extra: Map::from([("content_hash".to_string(), "cafebabe".to_string())]),
            },
        }
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    fn ok_body() -> serde_json::Value {
        serde_json::json!({"result": true, "status": "ok", "time": 0.001})
    }

    #[tokio::test]
    async fn ensure_collection_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs-embeddings"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings"))
            .and(body_partial_json(serde_json::json!({
                "vectors": {"size": DIMS, "distance": "Cosine"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings/index"))
            .and(body_partial_json(serde_json::json!({
                "field_name": "url", "field_schema": "keyword"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = QdrantStore::new(&test_config(&server, dir.path())).unwrap();
        assert!(store.ensure_collection(false).await.unwrap());
    }

    #[tokio::test]
    async fn existing_collection_left_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs-embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = QdrantStore::new(&test_config(&server, dir.path())).unwrap();
        assert!(!store.ensure_collection(false).await.unwrap());
    }

    #[tokio::test]
    async fn recreate_deletes_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/docs-embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/collections/docs-embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings/index"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = QdrantStore::new(&test_config(&server, dir.path())).unwrap();
        assert!(store.ensure_collection(true).await.unwrap());
    }

    #[tokio::test]
    async fn uploads_in_batches_with_stable_point_ids() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        let states = StateManager::from_dir(&config.state_dir);
        let store = QdrantStore::new(&config).unwrap().with_batch_size(2);

        let records: Vec<EmbeddingRecord> = (0..4).map(record).collect();
        let outcome = store
            .upload_embeddings(&records, &states, false, &mut |_, _| {})
            .await
            .unwrap();

        assert_eq!(outcome.uploaded.len(), 4);
        assert!(outcome.failed.is_empty());

        let state = states.load_upload();
        assert_eq!(state.completed_vectors, 4);
        assert!(state.is_uploaded(&records[0].chunk_id));
    }

    #[tokio::test]
    async fn failed_batch_degrades_to_per_record_upserts() {
        let server = MockServer::start().await;
        let poison = VectorRecord::point_id("abcdef0123456789_1").to_string();

        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings/points"))
            .respond_with(move |request: &Request| {
                let body: serde_json::Value =
                    serde_json::from_slice(&request.body).expect("json body");
                let points = body["points"].as_array().expect("points array");
                let has_poison = points
                    .iter()
                    .any(|p| p["id"].as_str() == Some(poison.as_str()));
                if points.len() > 1 || has_poison {
                    ResponseTemplate::new(400).set_body_string("bad points")
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": true}))
                }
            })
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        let states = StateManager::from_dir(&config.state_dir);
        let store = QdrantStore::new(&config).unwrap().with_batch_size(2);

        let records: Vec<EmbeddingRecord> = (0..4).map(record).collect();
        let outcome = store
            .upload_embeddings(&records, &states, false, &mut |_, _| {})
            .await
            .unwrap();

        // Every batch fails (2 points), every record but the poisoned one
        // succeeds individually.
        assert_eq!(outcome.uploaded.len(), 3);
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed.contains_key("abcdef0123456789_1"));

        let state = states.load_upload();
        assert_eq!(state.vectors_failed.len(), 1);
    }

    #[tokio::test]
    async fn resume_skips_uploaded_records() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        let states = StateManager::from_dir(&config.state_dir);

        let records: Vec<EmbeddingRecord> = (0..4).map(record).collect();
        let mut prior = UploadState::default();
        prior.mark_uploaded(&[
            records[0].chunk_id.clone(),
            records[1].chunk_id.clone(),
            records[2].chunk_id.clone(),
        ]);
        states.save_upload(&prior).unwrap();

        let store = QdrantStore::new(&config).unwrap().with_batch_size(2);
        let outcome = store
            .upload_embeddings(&records, &states, true, &mut |_, _| {})
            .await
            .unwrap();

        assert_eq!(outcome.uploaded.len(), 1);
        assert_eq!(outcome.skipped, 3);
    }

    #[tokio::test]
    async fn bad_record_is_a_per_record_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/docs-embeddings/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server, dir.path());
        let states = StateManager::from_dir(&config.state_dir);
        let store = QdrantStore::new(&config).unwrap();

        let mut records: Vec<EmbeddingRecord> = (0..2).map(record).collect();
        records[1].vector = vec![0.25; DIMS - 1]; // wrong dimension

        let outcome = store
            .upload_embeddings(&records, &states, false, &mut |_, _| {})
            .await
            .unwrap();

        assert_eq!(outcome.uploaded.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
    }

    #[tokio::test]
    async fn count_reads_exact_total() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs-embeddings/points/count"))
            .and(body_partial_json(serde_json::json!({"exact": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"result": {"count": 42}, "status": "ok"}),
            ))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = QdrantStore::new(&test_config(&server, dir.path())).unwrap();
        assert_eq!(store.count().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn search_passes_url_filter_and_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/docs-embeddings/points/search"))
            .and(body_partial_json(serde_json::json!({
                "with_payload": true,
                "filter": {"must": [{"key": "url", "match": {"value": "https://docs.example.com/guide"}}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [
                    {
                        "id": "00000000-0000-0000-0000-000000000001",
                        "score": 0.87,
                        "payload": {
                            "text": "Chunk text.",
                            "url": "https://docs.example.com/guide",
                            "title": "Guide",
                            "chunk_index": 0,
                            "total_chunks": 1,
                            "token_count": 3,
                            "model": "embed-english-v3.0",
                            "created_at": "2024-06-01T00:00:00Z"
                        }
                    }
                ],
                "status": "ok"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = QdrantStore::new(&test_config(&server, dir.path())).unwrap();

        let hits = store
            .search(
                &vec![0.1; DIMS],
                5,
                Some("https://docs.example.com/guide"),
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.8);
        assert_eq!(hits[0].payload["title"], "Guide");
    }
}
