//! HTML content extraction.
//!
//! Reduces a raw documentation page to clean reading text: locate the main
//! content region, drop site chrome (navigation, sidebars, pagination,
//! admonitions), serialize the remaining text with paragraph boundaries
//! intact, and normalize whitespace. Extraction is a pure function; the disk
//! cache for extracted pages lives in [`cache`].

pub mod cache;

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use docvec_shared::{DocumentPage, PipelineError, Result};

/// Selectors tried in order to locate the main content region.
const CONTENT_SELECTORS: [&str; 5] = [
    "article",
    r#"[role="main"]"#,
    ".main-content",
    "#__docusaurus",
    "main",
];

/// Chrome stripped from the content region before serialization.
const REMOVE_SELECTORS: [&str; 17] = [
    "nav",
    "header",
    "footer",
    ".navbar",
    ".footer",
    ".theme-code-block-highlighted-line",
    ".code-block-content",
    ".pagination-nav",
    ".table-of-contents",
    ".breadcrumbs",
    ".menu__link--sublist",
    ".theme-doc-sidebar-container",
    ".theme-doc-toc-mobile",
    ".theme-last-updated",
    ".theme-edit-this-page",
    r#"[role="navigation"]"#,
    ".admonition",
];

static CONTENT: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CONTENT_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("valid content selector"))
        .collect()
});

static REMOVE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    REMOVE_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("valid removal selector"))
        .collect()
});

/// Extract the main content of an HTML page into a [`DocumentPage`].
pub fn extract(html: &str, url: &str) -> Result<DocumentPage> {
    let doc = Html::parse_document(html);

    let title = extract_title(&doc);

    let content = find_content_element(&doc).ok_or_else(|| {
        PipelineError::extraction(format!("could not find content in {url}"))
    })?;

    // scraper's DOM is immutable, so removal is a skip set applied while
    // serializing rather than a destructive pass.
    let mut skip: HashSet<NodeId> = HashSet::new();
    for selector in REMOVE.iter() {
        for element in content.select(selector) {
            skip.insert(element.id());
        }
    }

    let mut raw = String::new();
    collect_text(*content, &skip, &mut raw);
    let text = normalize(&raw);

    if text.is_empty() {
        return Err(PipelineError::extraction(format!(
            "no text content in {url}"
        )));
    }

    debug!(url, title = %title, text_len = text.len(), "content extracted");

    DocumentPage::new(url, title, text, BTreeMap::new())
}

/// Locate the first content selector that yields non-empty text, falling
/// back to `<body>`.
fn find_content_element(doc: &Html) -> Option<ElementRef<'_>> {
    for selector in CONTENT.iter() {
        if let Some(element) = doc.select(selector).next() {
            if element.text().any(|t| !t.trim().is_empty()) {
                return Some(element);
            }
        }
    }

    let body = Selector::parse("body").expect("valid selector");
    doc.select(&body)
        .next()
        .filter(|el| el.text().any(|t| !t.trim().is_empty()))
}

/// Page title: first `<h1>`, else `<title>` minus a ` | site` suffix,
/// else `Untitled`.
fn extract_title(doc: &Html) -> String {
    let h1 = Selector::parse("h1").expect("valid selector");
    for element in doc.select(&h1) {
        let text = element.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return text;
        }
    }

    let title = Selector::parse("title").expect("valid selector");
    if let Some(element) = doc.select(&title).next() {
        let text = element.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return match text.split_once(" | ") {
                Some((head, _)) => head.trim().to_string(),
                None => text,
            };
        }
    }

    "Untitled".to_string()
}

/// Serialize text content, skipping removed subtrees. Block-level elements
/// end with a blank line so paragraph boundaries survive normalization;
/// list items and table rows get a single newline.
fn collect_text(node: NodeRef<'_, Node>, skip: &HashSet<NodeId>, out: &mut String) {
    for child in node.children() {
        if skip.contains(&child.id()) {
            continue;
        }
        match child.value() {
            Node::Text(text) => out.push_str(&text),
            Node::Element(element) => {
                match element.name() {
                    "script" | "style" | "noscript" | "template" | "svg" => continue,
                    "br" => {
                        out.push('\n');
                        continue;
                    }
                    _ => {}
                }
                collect_text(child, skip, out);
                if is_block_element(element.name()) {
                    out.push_str("\n\n");
                } else if matches!(element.name(), "li" | "tr" | "dt" | "dd") {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn is_block_element(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "aside"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "ul"
            | "ol"
            | "dl"
            | "pre"
            | "blockquote"
            | "table"
            | "figure"
            | "figcaption"
    )
}

/// Whitespace normalization: collapse space/tab runs, trim every line, and
/// collapse runs of blank lines to a single blank line. Idempotent.
pub fn normalize(text: &str) -> String {
    static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

    let collapsed = SPACES.replace_all(text, " ");

    let mut lines: Vec<&str> = Vec::new();
    let mut blank_pending = false;
    for line in collapsed.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_pending = !lines.is_empty();
        } else {
            if blank_pending {
                lines.push("");
                blank_pending = false;
            }
            lines.push(trimmed);
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUSAURUS_PAGE: &str = r##"<html>
<head><title>Installation | Example Docs</title></head>
<body>
  <nav class="navbar"><a href="/">Home</a><a href="/docs">Docs</a></nav>
  <div id="__docusaurus">
    <aside class="theme-doc-sidebar-container"><ul><li>Sidebar link</li></ul></aside>
    <article>
      <nav class="breadcrumbs"><a href="/docs">Docs</a> / Installation</nav>
      <h1>Installation</h1>
      <p>Install the package with your package   manager of choice.</p>
      <pre><code>npm install example-tool</code></pre>
      <p>Then verify the setup.</p>
      <div class="pagination-nav"><a href="/docs/next">Next page</a></div>
      <div class="theme-edit-this-page"><a href="#">Edit this page</a></div>
    </article>
  </div>
  <footer class="footer">Copyright 2024</footer>
</body>
</html>"##;

    #[test]
    fn extracts_main_content_and_strips_chrome() {
        let page = extract(DOCUSAURUS_PAGE, "https://docs.example.com/docs/installation").unwrap();

        assert_eq!(page.title, "Installation");
        assert!(page.extracted_text.contains("Install the package"));
        assert!(page.extracted_text.contains("npm install example-tool"));
        assert!(page.extracted_text.contains("Then verify the setup."));

        assert!(!page.extracted_text.contains("Sidebar link"));
        assert!(!page.extracted_text.contains("Next page"));
        assert!(!page.extracted_text.contains("Edit this page"));
        assert!(!page.extracted_text.contains("Copyright 2024"));
        assert!(!page.extracted_text.contains("Docs / Installation"));
    }

    #[test]
    fn whitespace_runs_collapsed() {
        let page = extract(DOCUSAURUS_PAGE, "https://docs.example.com/docs/installation").unwrap();
        assert!(page.extracted_text.contains("package manager of choice"));
    }

    #[test]
    fn paragraphs_separated_by_blank_lines() {
        let html = r#"<html><body><article>
            <h1>Guide</h1>
            <p>First paragraph.</p>
            <p>Second paragraph.</p>
        </article></body></html>"#;
        let page = extract(html, "https://docs.example.com/guide").unwrap();
        assert!(
            page.extracted_text
                .contains("First paragraph.\n\nSecond paragraph."),
            "text was: {:?}",
            page.extracted_text
        );
    }

    #[test]
    fn title_falls_back_to_title_tag() {
        let html = r#"<html><head><title>Getting Started | Example Docs</title></head>
            <body><main><p>Welcome to the documentation site.</p></main></body></html>"#;
        let page = extract(html, "https://docs.example.com/start").unwrap();
        assert_eq!(page.title, "Getting Started");
    }

    #[test]
    fn title_defaults_to_untitled() {
        let html = "<html><body><main><p>Body text without headings.</p></main></body></html>";
        let page = extract(html, "https://docs.example.com/plain").unwrap();
        assert_eq!(page.title, "Untitled");
    }

    #[test]
    fn falls_back_to_body_when_no_content_region() {
        let html = "<html><body><h1>Direct</h1><p>Content straight in body.</p></body></html>";
        let page = extract(html, "https://docs.example.com/bare").unwrap();
        assert!(page.extracted_text.contains("Content straight in body."));
    }

    #[test]
    fn empty_page_is_an_error() {
        let html = "<html><body>   </body></html>";
        let err = extract(html, "https://docs.example.com/empty").unwrap_err();
        assert!(matches!(err, PipelineError::Extraction { .. }));
    }

    #[test]
    fn content_hash_matches_normalized_text() {
        let page = extract(DOCUSAURUS_PAGE, "https://docs.example.com/docs/installation").unwrap();
        assert_eq!(
            page.content_hash,
            docvec_shared::types::sha256_hex(&page.extracted_text)
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let messy = "  Title  \n\n\n\nBody   line\twith\ttabs  \n\n\n second   para \n";
        let once = normalize(messy);
        let twice = normalize(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "Title\n\nBody line with tabs\n\nsecond para");
    }

    #[test]
    fn normalize_keeps_single_blank_lines() {
        let text = "para one\n\npara two\n\n\n\npara three";
        assert_eq!(normalize(text), "para one\n\npara two\n\npara three");
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = extract(DOCUSAURUS_PAGE, "https://docs.example.com/docs/installation").unwrap();
        let b = extract(DOCUSAURUS_PAGE, "https://docs.example.com/docs/installation").unwrap();
        assert_eq!(a.extracted_text, b.extracted_text);
        assert_eq!(a.content_hash, b.content_hash);
    }
}
