//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::warn;

use docvec_core::{
    CrawlStageOptions, CrawlSummary, EmbedStageOptions, EmbedSummary, PipelineOptions,
    PipelineSummary, ProgressReporter, SilentProgress, UploadStageOptions, UploadSummary,
    run_crawl, run_embed, run_pipeline, run_upload,
};
use docvec_shared::load_config;

/// Exit code for a user interrupt (SIGINT), matching shell convention.
const EXIT_INTERRUPTED: i32 = 130;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docvec — documentation site → vector store ingestion.
#[derive(Parser)]
#[command(
    name = "docvec",
    version,
    about = "Crawl a documentation site, embed its content, and upload the vectors.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Print machine-readable JSON summaries (logs go to stderr).
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Discover URLs from the sitemap, fetch pages, and cache extracted text.
    Crawl {
        /// Maximum number of pages to crawl.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Resume from the previous crawl state.
        #[arg(long)]
        resume: bool,

        /// Comma-separated URLs to crawl instead of the sitemap.
        #[arg(long)]
        urls: Option<String>,
    },

    /// Chunk cached pages and generate embeddings.
    Embed {
        /// Chunk size in tokens.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Chunk overlap in tokens.
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Maximum number of chunks to embed.
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Output embeddings file path.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Resume from the previous embed state.
        #[arg(long)]
        resume: bool,
    },

    /// Upload embeddings to the vector store.
    Upload {
        /// Input embeddings file path.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Upsert batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Recreate the collection (deletes existing data).
        #[arg(long)]
        recreate: bool,

        /// Resume from the previous upload state.
        #[arg(long)]
        resume: bool,
    },

    /// Run crawl, embed, and upload in order.
    Pipeline {
        /// Maximum number of pages to crawl.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Resume every stage from its previous state.
        #[arg(long)]
        resume: bool,

        /// Recreate the collection (deletes existing data).
        #[arg(long)]
        recreate: bool,

        /// Skip the crawl stage (use cached pages).
        #[arg(long)]
        skip_crawl: bool,

        /// Skip the embed stage (use the existing embeddings file).
        #[arg(long)]
        skip_embed: bool,

        /// Skip the upload stage.
        #[arg(long)]
        skip_upload: bool,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs always go to stderr so that
/// stdout carries only summaries.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docvec=info",
        1 => "docvec=debug",
        _ => "docvec=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Outcome of racing a stage future against ctrl-c.
enum StageResult<T> {
    Done(docvec_shared::Result<T>),
    Interrupted,
}

async fn with_interrupt<T>(
    fut: impl Future<Output = docvec_shared::Result<T>>,
) -> StageResult<T> {
    tokio::select! {
        result = fut => StageResult::Done(result),
        _ = tokio::signal::ctrl_c() => StageResult::Interrupted,
    }
}

/// Run the CLI command, returning the process exit code.
pub(crate) async fn run(cli: Cli) -> Result<i32> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            report_error(cli.json, &e.to_string());
            return Ok(1);
        }
    };

    let progress: Box<dyn ProgressReporter> = if cli.json {
        Box::new(SilentProgress)
    } else {
        Box::new(CliProgress::new())
    };

    match cli.command {
        Command::Crawl {
            max_pages,
            resume,
            urls,
        } => {
            let opts = CrawlStageOptions {
                urls: urls.map(|list| list.split(',').map(|u| u.trim().to_string()).collect()),
                max_pages,
                resume,
            };
            finish(
                cli.json,
                with_interrupt(run_crawl(&config, &opts, progress.as_ref())).await,
                print_crawl_summary,
                CrawlSummary::has_failures,
            )
        }
        Command::Embed {
            chunk_size,
            chunk_overlap,
            max_chunks,
            output,
            resume,
        } => {
            let opts = EmbedStageOptions {
                chunk_size,
                chunk_overlap,
                max_chunks,
                output,
                resume,
            };
            finish(
                cli.json,
                with_interrupt(run_embed(&config, &opts, progress.as_ref())).await,
                print_embed_summary,
                |_| false,
            )
        }
        Command::Upload {
            input,
            batch_size,
            recreate,
            resume,
        } => {
            let opts = UploadStageOptions {
                input,
                batch_size,
                recreate,
                resume,
            };
            finish(
                cli.json,
                with_interrupt(run_upload(&config, &opts, progress.as_ref())).await,
                print_upload_summary,
                UploadSummary::has_failures,
            )
        }
        Command::Pipeline {
            max_pages,
            resume,
            recreate,
            skip_crawl,
            skip_embed,
            skip_upload,
        } => {
            let opts = PipelineOptions {
                max_pages,
                resume,
                recreate,
                skip_crawl,
                skip_embed,
                skip_upload,
            };
            finish(
                cli.json,
                with_interrupt(run_pipeline(&config, &opts, progress.as_ref())).await,
                print_pipeline_summary,
                PipelineSummary::has_failures,
            )
        }
    }
}

/// Turn a stage result into output and an exit code.
fn finish<T: Serialize>(
    json: bool,
    result: StageResult<T>,
    print_summary: fn(&T),
    has_failures: fn(&T) -> bool,
) -> Result<i32> {
    match result {
        StageResult::Interrupted => {
            warn!("interrupted; progress up to the last completed item is saved");
            if !json {
                eprintln!("Interrupted. Re-run with --resume to continue.");
            }
            Ok(EXIT_INTERRUPTED)
        }
        StageResult::Done(Err(e)) => {
            report_error(json, &e.to_string());
            Ok(1)
        }
        StageResult::Done(Ok(summary)) => {
            if json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(if has_failures(&summary) { 1 } else { 0 })
        }
    }
}

fn report_error(json: bool, message: &str) {
    if json {
        println!("{}", serde_json::json!({ "error": message }));
    } else {
        eprintln!("error: {message}");
    }
}

// ---------------------------------------------------------------------------
// Summary output
// ---------------------------------------------------------------------------

fn print_crawl_summary(summary: &CrawlSummary) {
    println!();
    println!("  Crawl complete");
    println!("  Discovered: {}", summary.urls_discovered);
    println!("  Crawled:    {}", summary.pages_crawled);
    println!("  Failed:     {}", summary.pages_failed);
    println!();
}

fn print_embed_summary(summary: &EmbedSummary) {
    println!();
    println!("  Embedding complete");
    println!("  Documents:  {}", summary.documents);
    println!("  Chunks:     {}", summary.chunks);
    println!("  Embedded:   {}", summary.embedded);
    println!("  Skipped:    {}", summary.skipped);
    println!("  Output:     {}", summary.output.display());
    println!();
}

fn print_upload_summary(summary: &UploadSummary) {
    println!();
    println!("  Upload complete");
    println!("  Loaded:     {}", summary.records_loaded);
    println!("  Uploaded:   {}", summary.uploaded);
    println!("  Failed:     {}", summary.failed);
    println!("  Skipped:    {}", summary.skipped);
    println!("  In store:   {}", summary.total_in_collection);
    println!();
}

fn print_pipeline_summary(summary: &PipelineSummary) {
    if let Some(crawl) = &summary.crawl {
        print_crawl_summary(crawl);
    }
    if let Some(embed) = &summary.embed {
        print_embed_summary(embed);
    }
    if let Some(upload) = &summary.upload {
        print_upload_summary(upload);
    }
    println!("  Total time: {:.1}s", summary.duration_secs);
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Progress reporter backed by an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid progress template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_progress(&self, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}]"));
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}
