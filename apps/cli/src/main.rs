//! docvec CLI — ingest a documentation site into a vector store.
//!
//! Crawls the site's sitemap, extracts and chunks page text, generates
//! embeddings, and uploads the vectors for retrieval-augmented QA.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    let exit_code = commands::run(cli).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
