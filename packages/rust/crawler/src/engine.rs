//! Crawl engine: rate-limited concurrent fetching with resumable state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use docvec_shared::{PipelineConfig, PipelineError, Result, RetryPolicy, retry_with_backoff};
use docvec_state::{CrawlState, StateManager};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("docvec/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout.
const FETCH_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// PageProcessor
// ---------------------------------------------------------------------------

/// Consumes each fetched page body inside the crawl task.
///
/// Extraction and cache writes live behind this seam so the crawler does not
/// depend on the extractor. An error marks the URL failed without stopping
/// the crawl.
pub trait PageProcessor: Send + Sync {
    fn process(&self, url: &str, html: &str) -> Result<()>;
}

/// Processor that discards page bodies (fetch-only crawls and tests).
pub struct NoopProcessor;

impl PageProcessor for NoopProcessor {
    fn process(&self, _url: &str, _html: &str) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Crawl results
// ---------------------------------------------------------------------------

/// Options for one crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Cap on pages fetched this run.
    pub max_pages: Option<usize>,
    /// Skip URLs already recorded as completed or failed.
    pub resume: bool,
}

/// Summary of a completed crawl run.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// URLs fetched and processed during this run.
    pub completed: Vec<String>,
    /// URLs that failed during this run, with their errors.
    pub failed: BTreeMap<String, String>,
    /// Total URLs in the discovered set.
    pub discovered: usize,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Rate-limited concurrent page fetcher.
pub struct Crawler {
    config: PipelineConfig,
    client: Client,
}

impl Crawler {
    /// Create a crawler with the given configuration.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    /// Fetch a single page body, retrying transient failures.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        fetch_page(&self.client, url).await
    }

    /// Crawl every pending URL under the concurrency and rate limits.
    ///
    /// State is persisted after each completed or failed item, so an
    /// interrupt at any point resumes from the last finished page.
    #[instrument(skip_all, fields(urls = urls.len(), resume = opts.resume))]
    pub async fn crawl_all(
        &self,
        urls: &[String],
        opts: &CrawlOptions,
        states: &StateManager,
        processor: Arc<dyn PageProcessor>,
    ) -> Result<CrawlOutcome> {
        let mut state = if opts.resume {
            states.load_crawl()
        } else {
            CrawlState::default()
        };

        let mut pending: Vec<String> = urls
            .iter()
            .filter(|u| !state.is_completed(u) && !state.urls_failed.contains_key(*u))
            .cloned()
            .collect();
        if let Some(max) = opts.max_pages {
            pending.truncate(max);
        }

        state.urls_discovered = urls.to_vec();
        state.total_pages = urls.len();
        states.save_crawl(&state)?;

        info!(
            pending = pending.len(),
            concurrency = self.config.max_concurrent_requests,
            delay_ms = self.config.request_delay().as_millis() as u64,
            "starting crawl"
        );

        let state = Arc::new(Mutex::new(state));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));
        let delay = self.config.request_delay();

        let mut handles = Vec::with_capacity(pending.len());
        for url in pending {
            let client = self.client.clone();
            let sem = Arc::clone(&semaphore);
            let state = Arc::clone(&state);
            let states = states.clone();
            let processor = Arc::clone(&processor);

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");

                // Rate limit: sleep in-slot before issuing the request.
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let result = match fetch_page(&client, &url).await {
                    Ok(html) => processor.process(&url, &html),
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => {
                        debug!(url = %url, "page crawled");
                        record(&state, &states, |s| s.mark_completed(&url));
                        (url, None)
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "page failed");
                        let message = e.to_string();
                        record(&state, &states, |s| s.mark_failed(&url, message.clone()));
                        (url, Some(message))
                    }
                }
            }));
        }

        let mut completed = Vec::new();
        let mut failed = BTreeMap::new();
        for handle in handles {
            match handle.await {
                Ok((url, None)) => completed.push(url),
                Ok((url, Some(error))) => {
                    failed.insert(url, error);
                }
                Err(e) => {
                    warn!(error = %e, "crawl task panicked");
                }
            }
        }

        let state = state.lock().expect("crawl state poisoned");
        states.save_crawl(&state)?;

        info!(
            total = state.total_pages,
            completed = completed.len(),
            failed = failed.len(),
            "crawl complete"
        );

        Ok(CrawlOutcome {
            completed,
            failed,
            discovered: state.total_pages,
        })
    }
}

/// Mutate the shared state under its lock and persist the result.
fn record(
    state: &Arc<Mutex<CrawlState>>,
    states: &StateManager,
    mutate: impl FnOnce(&mut CrawlState),
) {
    let state = {
        let mut guard = state.lock().expect("crawl state poisoned");
        mutate(&mut guard);
        guard.clone()
    };
    if let Err(e) = states.save_crawl(&state) {
        warn!(error = %e, "failed to persist crawl state");
    }
}

/// Fetch one page with retry (max 3, base 1 s, cap 30 s).
///
/// Redirects are followed by the client; non-success statuses surface as
/// [`PipelineError::Http`], which retries only for 408/429/5xx.
async fn fetch_page(client: &Client, url: &str) -> Result<String> {
    let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
    retry_with_backoff(policy, "fetch_page", || async move {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| PipelineError::Network(format!("{url}: body read failed: {e}")))
    })
    .await
}
