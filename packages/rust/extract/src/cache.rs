//! Disk cache for extracted pages.
//!
//! Each page is stored as a `{url_hash}.txt` body plus a `{url_hash}.meta.json`
//! sidecar under `data/cache/extracted/`, where `url_hash` is the first 16 hex
//! characters of SHA-256 over the URL. The chunking stage reads the cache back
//! instead of re-fetching.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docvec_shared::{DocumentPage, PipelineError, Result};

/// Sidecar metadata stored next to each cached text file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub url: String,
    pub title: String,
    pub crawled_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Write a page's text and metadata sidecar into the cache directory.
pub fn save_page(dir: &Path, page: &DocumentPage) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

    let hash = page.url_hash();
    let text_path = dir.join(format!("{hash}.txt"));
    let meta_path = dir.join(format!("{hash}.meta.json"));

    std::fs::write(&text_path, &page.extracted_text)
        .map_err(|e| PipelineError::io(&text_path, e))?;

    let meta = CacheMeta {
        url: page.url.clone(),
        title: page.title.clone(),
        crawled_at: page.crawled_at,
        content_hash: page.content_hash.clone(),
        metadata: page.metadata.clone(),
    };
    let json = serde_json::to_string(&meta)
        .map_err(|e| PipelineError::validation(format!("cache metadata serialization: {e}")))?;
    std::fs::write(&meta_path, json).map_err(|e| PipelineError::io(&meta_path, e))?;

    debug!(url = %page.url, hash, "page cached");
    Ok(())
}

/// Load every cached page from the directory, sorted by URL.
///
/// Entries whose sidecar or text file is missing or unreadable are skipped
/// with a warning; they do not fail the load.
pub fn load_cached_pages(dir: &Path) -> Result<Vec<DocumentPage>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut pages = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let meta_path = entry.path();
        let name = meta_path.file_name().unwrap_or_default().to_string_lossy();
        let Some(stem) = name.strip_suffix(".meta.json") else {
            continue;
        };

        let text_path = dir.join(format!("{stem}.txt"));
        let loaded = std::fs::read_to_string(&meta_path)
            .map_err(|e| PipelineError::io(&meta_path, e))
            .and_then(|meta_json| {
                serde_json::from_str::<CacheMeta>(&meta_json).map_err(|e| {
                    PipelineError::validation(format!("{}: {e}", meta_path.display()))
                })
            })
            .and_then(|meta| {
                let text = std::fs::read_to_string(&text_path)
                    .map_err(|e| PipelineError::io(&text_path, e))?;
                DocumentPage::from_cache(
                    meta.url,
                    meta.title,
                    text,
                    meta.crawled_at,
                    meta.content_hash,
                    meta.metadata,
                )
            });

        match loaded {
            Ok(page) => pages.push(page),
            Err(e) => warn!(path = %meta_path.display(), error = %e, "skipping unreadable cache entry"),
        }
    }

    pages.sort_by(|a, b| a.url.cmp(&b.url));
    info!(count = pages.len(), "cached pages loaded");
    Ok(pages)
}
