//! Per-stage progress tracking for resumable pipeline runs.
//!
//! Each stage (crawl, embed, upload) persists a JSON state file under the
//! configured state directory. Completion sets are append-only within a run;
//! saves go through a temp file and an atomic rename so a crash mid-write
//! never corrupts the previous state.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use docvec_shared::{PipelineConfig, PipelineError, Result};

/// Stage names with a state file.
pub const STAGES: [&str; 3] = ["crawl", "embed", "upload"];

// ---------------------------------------------------------------------------
// CrawlState
// ---------------------------------------------------------------------------

/// Crawl progress: which URLs were discovered, fetched, or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlState {
    pub urls_discovered: Vec<String>,
    pub urls_completed: Vec<String>,
    pub urls_failed: BTreeMap<String, String>,
    pub total_pages: usize,
    pub completed_pages: usize,
    pub last_updated: DateTime<Utc>,
}

impl Default for CrawlState {
    fn default() -> Self {
        Self {
            urls_discovered: Vec::new(),
            urls_completed: Vec::new(),
            urls_failed: BTreeMap::new(),
            total_pages: 0,
            completed_pages: 0,
            last_updated: Utc::now(),
        }
    }
}

impl CrawlState {
    pub fn is_completed(&self, url: &str) -> bool {
        self.urls_completed.iter().any(|u| u == url)
    }

    pub fn mark_completed(&mut self, url: &str) {
        if !self.is_completed(url) {
            self.urls_completed.push(url.to_string());
            self.completed_pages += 1;
            self.last_updated = Utc::now();
        }
    }

    pub fn mark_failed(&mut self, url: &str, error: impl Into<String>) {
        self.urls_failed.insert(url.to_string(), error.into());
        self.last_updated = Utc::now();
    }

    /// URLs from the discovered set that are neither completed nor failed.
    pub fn pending_urls(&self) -> Vec<String> {
        let completed: HashSet<&str> = self.urls_completed.iter().map(String::as_str).collect();
        self.urls_discovered
            .iter()
            .filter(|u| !completed.contains(u.as_str()) && !self.urls_failed.contains_key(*u))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// EmbedState
// ---------------------------------------------------------------------------

/// Embedding progress, tracked per chunk id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedState {
    pub chunks_processed: Vec<String>,
    pub chunks_failed: BTreeMap<String, String>,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub batch_size: usize,
    pub last_updated: DateTime<Utc>,
}

impl Default for EmbedState {
    fn default() -> Self {
        Self {
            chunks_processed: Vec::new(),
            chunks_failed: BTreeMap::new(),
            total_chunks: 0,
            completed_chunks: 0,
            batch_size: 96,
            last_updated: Utc::now(),
        }
    }
}

impl EmbedState {
    pub fn is_processed(&self, chunk_id: &str) -> bool {
        self.chunks_processed.iter().any(|c| c == chunk_id)
    }

    /// Record a completed batch of chunk ids.
    pub fn mark_processed(&mut self, chunk_ids: &[String]) {
        self.chunks_processed.extend_from_slice(chunk_ids);
        self.completed_chunks += chunk_ids.len();
        self.last_updated = Utc::now();
    }

    pub fn mark_failed(&mut self, chunk_id: &str, error: impl Into<String>) {
        self.chunks_failed.insert(chunk_id.to_string(), error.into());
        self.last_updated = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// UploadState
// ---------------------------------------------------------------------------

/// Vector upload progress, tracked per chunk id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadState {
    pub vectors_uploaded: Vec<String>,
    pub vectors_failed: BTreeMap<String, String>,
    pub total_vectors: usize,
    pub completed_vectors: usize,
    pub batch_size: usize,
    pub last_updated: DateTime<Utc>,
}

impl Default for UploadState {
    fn default() -> Self {
        Self {
            vectors_uploaded: Vec::new(),
            vectors_failed: BTreeMap::new(),
            total_vectors: 0,
            completed_vectors: 0,
            batch_size: 100,
            last_updated: Utc::now(),
        }
    }
}

impl UploadState {
    pub fn is_uploaded(&self, vector_id: &str) -> bool {
        self.vectors_uploaded.iter().any(|v| v == vector_id)
    }

    /// Record a completed batch of vector ids.
    pub fn mark_uploaded(&mut self, vector_ids: &[String]) {
        self.vectors_uploaded.extend_from_slice(vector_ids);
        self.completed_vectors += vector_ids.len();
        self.last_updated = Utc::now();
    }

    pub fn mark_failed(&mut self, vector_id: &str, error: impl Into<String>) {
        self.vectors_failed
            .insert(vector_id.to_string(), error.into());
        self.last_updated = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// StateManager
// ---------------------------------------------------------------------------

/// Loads and persists stage state files.
#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
}

impl StateManager {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            state_dir: config.state_dir.clone(),
        }
    }

    pub fn from_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn load_crawl(&self) -> CrawlState {
        self.load_or_default("crawl")
    }

    pub fn save_crawl(&self, state: &CrawlState) -> Result<()> {
        self.save("crawl", state)
    }

    pub fn load_embed(&self) -> EmbedState {
        self.load_or_default("embed")
    }

    pub fn save_embed(&self, state: &EmbedState) -> Result<()> {
        self.save("embed", state)
    }

    pub fn load_upload(&self) -> UploadState {
        self.load_or_default("upload")
    }

    pub fn save_upload(&self, state: &UploadState) -> Result<()> {
        self.save("upload", state)
    }

    /// Delete a stage's state file, forgetting completed and failed items.
    pub fn reset(&self, stage: &str) -> Result<()> {
        let path = self.stage_path(stage);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
            info!(stage, "state reset");
        }
        Ok(())
    }

    /// Reset every stage.
    pub fn clear_all(&self) -> Result<()> {
        for stage in STAGES {
            self.reset(stage)?;
        }
        Ok(())
    }

    fn stage_path(&self, stage: &str) -> PathBuf {
        self.state_dir.join(format!("{stage}_state.json"))
    }

    fn load_or_default<T: Default + DeserializeOwned>(&self, stage: &str) -> T {
        let path = self.stage_path(stage);
        if !path.exists() {
            return T::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => {
                    debug!(stage, "state loaded");
                    state
                }
                Err(e) => {
                    warn!(stage, error = %e, "state file unreadable, starting fresh");
                    T::default()
                }
            },
            Err(e) => {
                warn!(stage, error = %e, "state file unreadable, starting fresh");
                T::default()
            }
        }
    }

    /// Serialize and atomically replace the stage's state file.
    fn save<T: Serialize>(&self, stage: &str, state: &T) -> Result<()> {
        let path = self.stage_path(stage);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }

        let json = serde_json::to_string(state)
            .map_err(|e| PipelineError::validation(format!("state serialization failed: {e}")))?;

        atomic_write(&path, &json)?;
        debug!(stage, "state saved");
        Ok(())
    }
}

/// Write via temp file + rename so readers never see a partial file.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|e| PipelineError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_state_marks_and_pending() {
        let mut state = CrawlState::default();
        state.urls_discovered = vec!["a".into(), "b".into(), "c".into()];
        state.total_pages = 3;

        state.mark_completed("a");
        state.mark_completed("a"); // idempotent
        state.mark_failed("b", "HTTP 404");

        assert_eq!(state.completed_pages, 1);
        assert!(state.is_completed("a"));
        assert_eq!(state.pending_urls(), vec!["c".to_string()]);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = StateManager::from_dir(dir.path());

        let mut state = CrawlState::default();
        state.urls_discovered = vec!["https://x/1".into(), "https://x/2".into()];
        state.total_pages = 2;
        state.mark_completed("https://x/1");
        state.mark_failed("https://x/2", "network error: reset");

        manager.save_crawl(&state).expect("save");
        let loaded = manager.load_crawl();

        assert_eq!(loaded.urls_discovered, state.urls_discovered);
        assert_eq!(loaded.urls_completed, state.urls_completed);
        assert_eq!(loaded.urls_failed, state.urls_failed);
        assert_eq!(loaded.completed_pages, 1);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = StateManager::from_dir(dir.path());
        let state = manager.load_embed();
        assert!(state.chunks_processed.is_empty());
        assert_eq!(state.batch_size, 96);
    }

    #[test]
    fn corrupt_file_yields_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("upload_state.json"), "{not json").unwrap();

        let manager = StateManager::from_dir(dir.path());
        let state = manager.load_upload();
        assert!(state.vectors_uploaded.is_empty());
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = StateManager::from_dir(dir.path());
        manager.save_embed(&EmbedState::default()).expect("save");

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["embed_state.json".to_string()]);
    }

    #[test]
    fn reset_and_clear_all() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = StateManager::from_dir(dir.path());

        manager.save_crawl(&CrawlState::default()).unwrap();
        manager.save_embed(&EmbedState::default()).unwrap();
        manager.save_upload(&UploadState::default()).unwrap();

        manager.reset("crawl").unwrap();
        assert!(!dir.path().join("crawl_state.json").exists());
        assert!(dir.path().join("embed_state.json").exists());

        manager.clear_all().unwrap();
        assert!(!dir.path().join("embed_state.json").exists());
        assert!(!dir.path().join("upload_state.json").exists());
    }

    #[test]
    fn embed_state_batch_marking() {
        let mut state = EmbedState::default();
        state.mark_processed(&["a_0".into(), "a_1".into()]);
        state.mark_failed("a_2", "provider error");

        assert!(state.is_processed("a_0"));
        assert!(!state.is_processed("a_2"));
        assert_eq!(state.completed_chunks, 2);
    }

    #[test]
    fn upload_state_batch_marking() {
        let mut state = UploadState::default();
        state.mark_uploaded(&["a_0".into()]);
        assert!(state.is_uploaded("a_0"));
        assert_eq!(state.completed_vectors, 1);
        assert_eq!(state.batch_size, 100);
    }
}
