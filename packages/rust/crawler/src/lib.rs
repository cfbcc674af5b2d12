//! Bounded-concurrency page crawler.
//!
//! Fetches discovered URLs under a concurrency limit and a per-slot delay
//! sized to the site's request budget, records progress in [`CrawlState`],
//! and hands each fetched body to a [`PageProcessor`] for extraction and
//! caching.

mod engine;

pub use engine::{CrawlOptions, CrawlOutcome, Crawler, NoopProcessor, PageProcessor};

pub use docvec_state::CrawlState;
