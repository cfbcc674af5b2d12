//! Stage orchestration for the ingestion pipeline.
//!
//! Wires discovery, crawling, extraction, chunking, embedding, and vector
//! upload into the four operations the CLI exposes: `crawl`, `embed`,
//! `upload`, and the full `pipeline`.

pub mod pipeline;

pub use pipeline::{
    CrawlStageOptions, CrawlSummary, EmbedStageOptions, EmbedSummary, PipelineOptions,
    PipelineSummary, ProgressReporter, SilentProgress, UploadStageOptions, UploadSummary,
    run_crawl, run_embed, run_pipeline, run_upload,
};
