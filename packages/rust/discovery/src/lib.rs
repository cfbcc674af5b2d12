//! Sitemap discovery.
//!
//! Fetches the site's `sitemap.xml` and collects every page URL. Both flat
//! sitemaps (`<urlset>` with `<url><loc>` children) and sitemap indexes
//! (`<sitemapindex>` with `<sitemap><loc>` children, followed one level deep)
//! are accepted. Namespaces are ignored during traversal.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use docvec_shared::{PipelineConfig, PipelineError, Result, RetryPolicy, retry_with_backoff};

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("docvec/", env!("CARGO_PKG_VERSION"));

/// Timeout for sitemap requests.
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Build the HTTP client used for sitemap fetches.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .map_err(|e| PipelineError::Network(format!("failed to build HTTP client: {e}")))
}

/// Discover page URLs from the configured sitemap.
///
/// Fetch or parse failures of the root sitemap are fatal; a nested sitemap
/// that fails to fetch or parse only drops its own entries. When
/// `docs_path_filter` is set it applies to top-level `<url>` entries only —
/// nested sitemaps are treated as already filtered by the publisher.
#[instrument(skip_all, fields(sitemap_url = %config.sitemap_url))]
pub async fn discover_urls(client: &Client, config: &PipelineConfig) -> Result<Vec<String>> {
    let xml = fetch_text(
        client,
        &config.sitemap_url,
        RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30)),
    )
    .await?;

    let doc = roxmltree::Document::parse(&xml)
        .map_err(|e| PipelineError::Sitemap(format!("{}: {e}", config.sitemap_url)))?;

    let mut urls = Vec::new();

    // Sitemap index entries, recursed one level deep.
    for nested_url in loc_values(&doc, "sitemap") {
        if nested_url == config.sitemap_url {
            continue; // self-reference guard
        }
        match fetch_nested_sitemap(client, &nested_url).await {
            Ok(nested) => {
                debug!(url = %nested_url, count = nested.len(), "nested sitemap parsed");
                urls.extend(nested);
            }
            Err(e) => {
                warn!(url = %nested_url, error = %e, "nested sitemap failed, skipping");
            }
        }
    }

    // Direct page entries, optionally filtered.
    for url in loc_values(&doc, "url") {
        if let Some(filter) = &config.docs_path_filter {
            let trimmed = filter.trim_end_matches('/');
            if !url.contains(filter.as_str()) && !url.trim_end_matches('/').ends_with(trimmed) {
                continue;
            }
        }
        urls.push(url);
    }

    info!(url_count = urls.len(), "sitemap parsed");
    Ok(urls)
}

/// Fetch a nested sitemap and collect its `<url><loc>` entries.
async fn fetch_nested_sitemap(client: &Client, sitemap_url: &str) -> Result<Vec<String>> {
    let xml = fetch_text(
        client,
        sitemap_url,
        RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(30)),
    )
    .await?;

    let doc = roxmltree::Document::parse(&xml)
        .map_err(|e| PipelineError::Sitemap(format!("{sitemap_url}: {e}")))?;

    Ok(loc_values(&doc, "url"))
}

/// Collect the `<loc>` text of every element with the given local tag name.
fn loc_values(doc: &roxmltree::Document<'_>, tag: &str) -> Vec<String> {
    doc.descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == tag)
        .filter_map(|n| {
            n.children()
                .find(|c| c.is_element() && c.tag_name().name() == "loc")
                .and_then(|c| c.text())
                .map(|t| t.trim().to_string())
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// GET a URL under retry, returning the response body.
async fn fetch_text(client: &Client, url: &str, policy: RetryPolicy) -> Result<String> {
    retry_with_backoff(policy, "fetch_sitemap", || async move {
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
