//! Stage runners: crawl → embed → upload, each independently resumable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use docvec_chunker::Chunker;
use docvec_crawler::{CrawlOptions, Crawler, PageProcessor};
use docvec_embedder::{CohereEmbedder, jsonl};
use docvec_extract::cache;
use docvec_shared::{PipelineConfig, PipelineError, Result, TextChunk};
use docvec_state::StateManager;
use docvec_vectorstore::QdrantStore;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callbacks for long-running stages.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as items complete within the current phase.
    fn item_progress(&self, current: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_progress(&self, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Stage options
// ---------------------------------------------------------------------------

/// Options for the crawl stage.
#[derive(Debug, Clone, Default)]
pub struct CrawlStageOptions {
    /// Explicit URL list, bypassing sitemap discovery.
    pub urls: Option<Vec<String>>,
    /// Cap on pages fetched this run.
    pub max_pages: Option<usize>,
    /// Skip URLs recorded in the crawl state.
    pub resume: bool,
}

/// Options for the embed stage.
#[derive(Debug, Clone, Default)]
pub struct EmbedStageOptions {
    /// Override the configured chunk size (tokens).
    pub chunk_size: Option<usize>,
    /// Override the configured chunk overlap (tokens).
    pub chunk_overlap: Option<usize>,
    /// Cap on chunks embedded this run.
    pub max_chunks: Option<usize>,
    /// Override the embeddings output path.
    pub output: Option<PathBuf>,
    /// Skip chunks recorded in the embed state.
    pub resume: bool,
}

/// Options for the upload stage.
#[derive(Debug, Clone, Default)]
pub struct UploadStageOptions {
    /// Override the embeddings input path.
    pub input: Option<PathBuf>,
    /// Override the upsert batch size.
    pub batch_size: Option<usize>,
    /// Delete and recreate the collection first.
    pub recreate: bool,
    /// Skip vectors recorded in the upload state.
    pub resume: bool,
}

/// Options for the full pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub max_pages: Option<usize>,
    pub resume: bool,
    pub recreate: bool,
    pub skip_crawl: bool,
    pub skip_embed: bool,
    pub skip_upload: bool,
}

// ---------------------------------------------------------------------------
// Stage summaries
// ---------------------------------------------------------------------------

/// Crawl stage result, serializable for `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub urls_discovered: usize,
    pub pages_crawled: usize,
    pub pages_failed: usize,
}

impl CrawlSummary {
    pub fn has_failures(&self) -> bool {
        self.pages_failed > 0
    }
}

/// Embed stage result.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedSummary {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub output: PathBuf,
}

/// Upload stage result.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub records_loaded: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub collection_created: bool,
    pub total_in_collection: u64,
}

impl UploadSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Full pipeline result.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub crawl: Option<CrawlSummary>,
    pub embed: Option<EmbedSummary>,
    pub upload: Option<UploadSummary>,
    pub duration_secs: f64,
}

impl PipelineSummary {
    pub fn has_failures(&self) -> bool {
        self.crawl.as_ref().is_some_and(CrawlSummary::has_failures)
            || self.upload.as_ref().is_some_and(UploadSummary::has_failures)
    }
}

// ---------------------------------------------------------------------------
// Crawl stage
// ---------------------------------------------------------------------------

/// Extracts and caches each fetched page inside the crawl task.
struct ExtractingProcessor {
    cache_dir: PathBuf,
}

impl PageProcessor for ExtractingProcessor {
    fn process(&self, url: &str, html: &str) -> Result<()> {
        let page = docvec_extract::extract(html, url)?;
        cache::save_page(&self.cache_dir, &page)
    }
}

/// Discover URLs (sitemap or explicit list), crawl them, and cache the
/// extracted text of every fetched page.
#[instrument(skip_all)]
pub async fn run_crawl(
    config: &PipelineConfig,
    opts: &CrawlStageOptions,
    progress: &dyn ProgressReporter,
) -> Result<CrawlSummary> {
    config.ensure_dirs()?;

    let urls = match &opts.urls {
        Some(urls) => urls.clone(),
        None => {
            progress.phase("Discovering URLs from sitemap");
            let client = docvec_discovery::build_client()?;
            docvec_discovery::discover_urls(&client, config).await?
        }
    };

    progress.phase("Crawling pages");
    let crawler = Crawler::new(config)?;
    let states = StateManager::new(config);
    let processor = Arc::new(ExtractingProcessor {
        cache_dir: config.extracted_cache_dir(),
    });

    let crawl_opts = CrawlOptions {
        max_pages: opts.max_pages,
        resume: opts.resume,
    };
    let outcome = crawler
        .crawl_all(&urls, &crawl_opts, &states, processor)
        .await?;

    Ok(CrawlSummary {
        urls_discovered: outcome.discovered,
        pages_crawled: outcome.completed.len(),
        pages_failed: outcome.failed.len(),
    })
}

// ---------------------------------------------------------------------------
// Embed stage
// ---------------------------------------------------------------------------

/// Load cached pages, chunk them, and embed the chunks into the JSONL file.
#[instrument(skip_all)]
pub async fn run_embed(
    config: &PipelineConfig,
    opts: &EmbedStageOptions,
    progress: &dyn ProgressReporter,
) -> Result<EmbedSummary> {
    let mut config = config.clone();
    if let Some(size) = opts.chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = opts.chunk_overlap {
        config.chunk_overlap = overlap;
    }
    if let Some(output) = &opts.output {
        config.embeddings_path = output.clone();
    }
    config.ensure_dirs()?;

    progress.phase("Loading cached pages");
    let pages = cache::load_cached_pages(&config.extracted_cache_dir())?;
    if pages.is_empty() {
        return Err(PipelineError::validation(
            "no cached pages found — run the crawl stage first",
        ));
    }

    progress.phase("Chunking documents");
    let chunker = Chunker::new(config.chunk_size, config.chunk_overlap);
    let mut chunks: Vec<TextChunk> = Vec::new();
    for page in &pages {
        chunks.extend(chunker.chunk(page)?);
    }
    if let Some(max) = opts.max_chunks {
        chunks.truncate(max);
    }
    info!(documents = pages.len(), chunks = chunks.len(), "chunking complete");

    progress.phase("Generating embeddings");
    let embedder = CohereEmbedder::new(&config)?;
    let states = StateManager::new(&config);
    let outcome = embedder
        .embed_chunks(&chunks, &states, opts.resume, &mut |current, total| {
            progress.item_progress(current, total);
        })
        .await?;

    Ok(EmbedSummary {
        documents: pages.len(),
        chunks: chunks.len(),
        embedded: outcome.embedded,
        skipped: outcome.skipped,
        output: config.embeddings_path.clone(),
    })
}

// ---------------------------------------------------------------------------
// Upload stage
// ---------------------------------------------------------------------------

/// Read the embeddings JSONL and upsert everything into the collection.
#[instrument(skip_all)]
pub async fn run_upload(
    config: &PipelineConfig,
    opts: &UploadStageOptions,
    progress: &dyn ProgressReporter,
) -> Result<UploadSummary> {
    let mut config = config.clone();
    if let Some(input) = &opts.input {
        config.embeddings_path = input.clone();
    }
    config.ensure_dirs()?;

    progress.phase("Connecting to vector store");
    let mut store = QdrantStore::new(&config)?;
    if let Some(batch_size) = opts.batch_size {
        store = store.with_batch_size(batch_size);
    }
    store.connect().await?;

    progress.phase("Preparing collection");
    let collection_created = store.ensure_collection(opts.recreate).await?;

    progress.phase("Loading embeddings");
    let records = jsonl::read_records(&config.embeddings_path)?;
    if records.is_empty() {
        warn!(path = %config.embeddings_path.display(), "no embeddings to upload");
        return Ok(UploadSummary {
            records_loaded: 0,
            uploaded: 0,
            failed: 0,
            skipped: 0,
            collection_created,
            total_in_collection: store.count().await.unwrap_or(0),
        });
    }

    progress.phase("Uploading vectors");
    let states = StateManager::new(&config);
    let outcome = store
        .upload_embeddings(&records, &states, opts.resume, &mut |current, total| {
            progress.item_progress(current, total);
        })
        .await?;

    progress.phase("Verifying collection");
    let total_in_collection = store.count().await?;

    Ok(UploadSummary {
        records_loaded: records.len(),
        uploaded: outcome.uploaded.len(),
        failed: outcome.failed.len(),
        skipped: outcome.skipped,
        collection_created,
        total_in_collection,
    })
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// Run crawl, embed, and upload in order with skip gates.
#[instrument(skip_all)]
pub async fn run_pipeline(
    config: &PipelineConfig,
    opts: &PipelineOptions,
    progress: &dyn ProgressReporter,
) -> Result<PipelineSummary> {
    let started = Instant::now();

    let crawl = if opts.skip_crawl {
        None
    } else {
        let stage_opts = CrawlStageOptions {
            urls: None,
            max_pages: opts.max_pages,
            resume: opts.resume,
        };
        Some(run_crawl(config, &stage_opts, progress).await?)
    };

    let embed = if opts.skip_embed {
        None
    } else {
        let stage_opts = EmbedStageOptions {
            resume: opts.resume,
            ..EmbedStageOptions::default()
        };
        Some(run_embed(config, &stage_opts, progress).await?)
    };

    let upload = if opts.skip_upload {
        None
    } else {
        let stage_opts = UploadStageOptions {
            recreate: opts.recreate,
            resume: opts.resume,
            ..UploadStageOptions::default()
        };
        Some(run_upload(config, &stage_opts, progress).await?)
    };

    let summary = PipelineSummary {
        crawl,
        embed,
        upload,
        duration_secs: started.elapsed().as_secs_f64(),
    };

    info!(
        duration_secs = summary.duration_secs,
        failures = summary.has_failures(),
        "pipeline complete"
    );

    Ok(summary)
}
