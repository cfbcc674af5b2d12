//! Pipeline configuration.
//!
//! All settings come from the environment (with a `.env` file loaded first if
//! present). Everything except the provider credentials has a default, so a
//! config is usable out of the box once `COHERE_API_KEY`, `QDRANT_URL`, and
//! `QDRANT_API_KEY` are set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Vector length produced by `embed-english-v3.0`.
const EMBED_ENGLISH_V3_DIMENSIONS: usize = 1024;

/// Runtime configuration for every pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL of the documentation site to ingest.
    #[serde(default = "default_docusaurus_url")]
    pub docusaurus_url: String,

    /// Sitemap URL; derived from `docusaurus_url` when empty.
    #[serde(default)]
    pub sitemap_url: String,

    /// Optional substring filter applied to top-level sitemap entries
    /// (e.g. `/docs/`). Entries from nested sitemaps are never filtered.
    #[serde(default)]
    pub docs_path_filter: Option<String>,

    /// Cohere API key (required).
    #[serde(default)]
    pub cohere_api_key: String,

    /// Cohere embed endpoint (override for self-hosted gateways and tests).
    #[serde(default = "default_cohere_api_url")]
    pub cohere_api_url: String,

    /// Cohere embedding model identifier.
    #[serde(default = "default_cohere_model")]
    pub cohere_model: String,

    /// Texts per embedding request.
    #[serde(default = "default_cohere_batch_size")]
    pub cohere_batch_size: usize,

    /// Embedding requests-per-minute budget.
    #[serde(default = "default_cohere_max_rpm")]
    pub cohere_max_rpm: u32,

    /// Qdrant endpoint URL (required).
    #[serde(default)]
    pub qdrant_url: String,

    /// Qdrant API key (required).
    #[serde(default)]
    pub qdrant_api_key: String,

    /// Qdrant collection name.
    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,

    /// Target chunk size in tokens.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunk overlap in tokens.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Maximum in-flight page fetches.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Per-slot delay before each page fetch, in seconds.
    #[serde(default = "default_request_delay_secs")]
    pub request_delay_secs: f64,

    /// Root data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Cache directory (extracted page text lives under `<cache>/extracted`).
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Per-stage state file directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Log output directory.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Embeddings JSONL handoff file.
    #[serde(default = "default_embeddings_path")]
    pub embeddings_path: PathBuf,
}

fn default_docusaurus_url() -> String {
    "https://ai-robotics-course.vercel.app/".into()
}
fn default_cohere_model() -> String {
    "embed-english-v3.0".into()
}
fn default_cohere_api_url() -> String {
    "https://api.cohere.com/v2/embed".into()
}
fn default_cohere_batch_size() -> usize {
    96
}
fn default_cohere_max_rpm() -> u32 {
    100
}
fn default_qdrant_collection() -> String {
    "docs-embeddings".into()
}
fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_max_concurrent_requests() -> usize {
    5
}
fn default_request_delay_secs() -> f64 {
    0.6 // 60s / 100 RPM
}
fn default_data_dir() -> PathBuf {
    "data".into()
}
fn default_cache_dir() -> PathBuf {
    "data/cache".into()
}
fn default_state_dir() -> PathBuf {
    "data/state".into()
}
fn default_log_dir() -> PathBuf {
    "data/logs".into()
}
fn default_embeddings_path() -> PathBuf {
    "data/embeddings.jsonl".into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            docusaurus_url: default_docusaurus_url(),
            sitemap_url: String::new(),
            docs_path_filter: None,
            cohere_api_key: String::new(),
            cohere_api_url: default_cohere_api_url(),
            cohere_model: default_cohere_model(),
            cohere_batch_size: default_cohere_batch_size(),
            cohere_max_rpm: default_cohere_max_rpm(),
            qdrant_url: String::new(),
            qdrant_api_key: String::new(),
            qdrant_collection: default_qdrant_collection(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_delay_secs: default_request_delay_secs(),
            data_dir: default_data_dir(),
            cache_dir: default_cache_dir(),
            state_dir: default_state_dir(),
            log_dir: default_log_dir(),
            embeddings_path: default_embeddings_path(),
        }
    }
}

impl PipelineConfig {
    /// Derive defaults and check required fields.
    ///
    /// Must be called after construction; [`load_config`] does this for you.
    pub fn finalize(mut self) -> Result<Self> {
        if self.sitemap_url.is_empty() && !self.docusaurus_url.is_empty() {
            let base = self.docusaurus_url.trim_end_matches('/');
            self.sitemap_url = format!("{base}/sitemap.xml");
        }

        if self.cohere_api_key.is_empty() {
            return Err(PipelineError::config(
                "COHERE_API_KEY is required. Set it in the environment or a .env file.",
            ));
        }
        if self.qdrant_url.is_empty() {
            return Err(PipelineError::config(
                "QDRANT_URL is required. Set it in the environment or a .env file.",
            ));
        }
        if self.qdrant_api_key.is_empty() {
            return Err(PipelineError::config(
                "QDRANT_API_KEY is required. Set it in the environment or a .env file.",
            ));
        }

        Ok(self)
    }

    /// Embedding vector length for the configured model.
    pub fn embedding_dimensions(&self) -> usize {
        EMBED_ENGLISH_V3_DIMENSIONS
    }

    /// Per-slot crawl delay as a [`Duration`].
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay_secs.max(0.0))
    }

    /// Sleep between embedding batches, sized to the RPM budget.
    pub fn embed_batch_delay(&self) -> Duration {
        if self.cohere_max_rpm == 0 {
            return Duration::from_secs_f64(0.6);
        }
        Duration::from_secs_f64(60.0 / f64::from(self.cohere_max_rpm))
    }

    /// State file path for a stage (`crawl`, `embed`, `upload`).
    pub fn state_path(&self, stage: &str) -> PathBuf {
        self.state_dir.join(format!("{stage}_state.json"))
    }

    /// Directory holding extracted page text and metadata sidecars.
    pub fn extracted_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("extracted")
    }

    /// Create every directory the pipeline writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.data_dir.as_path(),
            self.cache_dir.as_path(),
            &self.extracted_cache_dir(),
            self.state_dir.as_path(),
            self.log_dir.as_path(),
        ] {
            std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }

    /// Re-root every relative path under `root` (used by tests and the
    /// `pipeline` command's `--data-dir` override).
    pub fn with_data_root(mut self, root: &Path) -> Self {
        self.data_dir = root.to_path_buf();
        self.cache_dir = root.join("cache");
        self.state_dir = root.join("state");
        self.log_dir = root.join("logs");
        self.embeddings_path = root.join("embeddings.jsonl");
        self
    }
}

/// Load configuration from the process environment (and `.env` if present).
pub fn load_config() -> Result<PipelineConfig> {
    // A missing .env file is fine; explicit environment always wins below.
    let _ = dotenvy::dotenv();

    let mut config = PipelineConfig {
        cohere_api_key: env_or_empty("COHERE_API_KEY"),
        qdrant_url: env_or_empty("QDRANT_URL"),
        qdrant_api_key: env_or_empty("QDRANT_API_KEY"),
        ..PipelineConfig::default()
    };

    if let Ok(url) = std::env::var("DOCUSAURUS_URL") {
        if !url.is_empty() {
            config.docusaurus_url = url;
        }
    }
    if let Ok(url) = std::env::var("SITEMAP_URL") {
        config.sitemap_url = url;
    }
    if let Ok(name) = std::env::var("QDRANT_COLLECTION") {
        if !name.is_empty() {
            config.qdrant_collection = name;
        }
    }
    if let Ok(filter) = std::env::var("DOCS_PATH_FILTER") {
        if !filter.is_empty() {
            config.docs_path_filter = Some(filter);
        }
    }
    if let Ok(url) = std::env::var("COHERE_API_URL") {
        if !url.is_empty() {
            config.cohere_api_url = url;
        }
    }

    config.finalize()
}

fn env_or_empty(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys() -> PipelineConfig {
        PipelineConfig {
            cohere_api_key: "key".into(),
            qdrant_url: "https://qdrant.example.com".into(),
            qdrant_api_key: "key".into(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn sitemap_url_derived_from_base() {
        let config = PipelineConfig {
            docusaurus_url: "https://docs.example.com/".into(),
            ..config_with_keys()
        };
        let config = config.finalize().expect("finalize");
        assert_eq!(config.sitemap_url, "https://docs.example.com/sitemap.xml");
    }

    #[test]
    fn explicit_sitemap_url_kept() {
        let config = PipelineConfig {
            sitemap_url: "https://docs.example.com/custom-sitemap.xml".into(),
            ..config_with_keys()
        };
        let config = config.finalize().expect("finalize");
        assert_eq!(
            config.sitemap_url,
            "https://docs.example.com/custom-sitemap.xml"
        );
    }

    #[test]
    fn missing_required_keys_rejected() {
        let config = PipelineConfig {
            cohere_api_key: String::new(),
            ..config_with_keys()
        };
        let err = config.finalize().unwrap_err();
        assert!(err.to_string().contains("COHERE_API_KEY"));

        let config = PipelineConfig {
            qdrant_url: String::new(),
            ..config_with_keys()
        };
        let err = config.finalize().unwrap_err();
        assert!(err.to_string().contains("QDRANT_URL"));
    }

    #[test]
    fn delay_defaults() {
        let config = config_with_keys().finalize().expect("finalize");
        assert_eq!(config.request_delay(), Duration::from_secs_f64(0.6));
        assert_eq!(config.embed_batch_delay(), Duration::from_secs_f64(0.6));
        assert_eq!(config.embedding_dimensions(), 1024);
    }

    #[test]
    fn state_and_cache_paths() {
        let config = config_with_keys();
        assert_eq!(
            config.state_path("crawl"),
            PathBuf::from("data/state/crawl_state.json")
        );
        assert_eq!(
            config.extracted_cache_dir(),
            PathBuf::from("data/cache/extracted")
        );
    }

    #[test]
    fn data_root_override() {
        let config = config_with_keys().with_data_root(Path::new("/tmp/docvec"));
        assert_eq!(config.state_path("embed").parent().unwrap(), Path::new("/tmp/docvec/state"));
        assert_eq!(config.embeddings_path, PathBuf::from("/tmp/docvec/embeddings.jsonl"));
    }
}
