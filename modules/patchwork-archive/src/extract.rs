//! Readable-content extraction.
//!
//! Three tiers tried in order until one yields enough text: readability
//! (dominant article node via spider_transformations), a heuristic
//! main-content selector, and a boilerplate-stripping fallback. PDFs go
//! through text-layer parsing instead. The tier that produced the text
//! is reported to the caller and stored on the citation.

use std::sync::LazyLock;

use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};
use tracing::debug;

use patchwork_common::ExtractionMethod;

use crate::text::{collapse_whitespace, strip_boilerplate, strip_tags};

static ARTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").expect("valid regex")
});

static MAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<main\b[^>]*>(.*?)</main>").expect("valid regex"));

static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("valid regex"));

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));

static OG_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]+property\s*=\s*["']og:title["'][^>]+content\s*=\s*["']([^"']+)["']"#)
        .expect("valid regex")
});

static H1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct Extracted {
    pub title: Option<String>,
    pub text_content: String,
    pub length: usize,
    pub method: ExtractionMethod,
}

pub struct Extractor {
    min_bytes: usize,
}

impl Extractor {
    pub fn new(min_bytes: usize) -> Self {
        Self { min_bytes }
    }

    pub fn extract(&self, body: &[u8], content_type: Option<&str>, url: &str) -> Extracted {
        if is_pdf(content_type, url) {
            return self.extract_pdf(body, url);
        }

        let html = String::from_utf8_lossy(body);
        let title = extract_title(&html);

        // Tier a: readability. Markdown structure is kept as-is.
        let readable = readability_markdown(body, url).trim().to_string();
        if readable.len() >= self.min_bytes {
            return Extracted {
                title,
                length: readable.len(),
                text_content: readable,
                method: ExtractionMethod::Readability,
            };
        }

        // Tier b: heuristic main-content selection.
        let heuristic = main_content_text(&html);
        if heuristic.len() >= self.min_bytes {
            return Extracted {
                title,
                length: heuristic.len(),
                text_content: heuristic,
                method: ExtractionMethod::ContentExtractor,
            };
        }

        // Tier c: boilerplate-stripping fallback.
        let fallback = strip_boilerplate(&html);
        if fallback.len() >= self.min_bytes {
            return Extracted {
                title,
                length: fallback.len(),
                text_content: fallback,
                method: ExtractionMethod::Fallback,
            };
        }

        debug!(url, bytes = fallback.len(), "All extraction tiers below minimum");
        Extracted {
            title,
            length: fallback.len(),
            text_content: fallback,
            method: ExtractionMethod::Insufficient,
        }
    }

    /// PDF text-layer parse. Reported as the fallback tier when it
    /// yields enough text; `insufficient` otherwise (scanned documents
    /// with no text layer land here).
    fn extract_pdf(&self, body: &[u8], url: &str) -> Extracted {
        let text = match pdf_extract::extract_text_from_mem(body) {
            Ok(t) => collapse_whitespace(&t),
            Err(e) => {
                debug!(url, error = %e, "PDF text-layer parse failed");
                String::new()
            }
        };
        let method = if text.len() >= self.min_bytes {
            ExtractionMethod::Fallback
        } else {
            ExtractionMethod::Insufficient
        };
        Extracted {
            title: None,
            length: text.len(),
            text_content: text,
            method,
        }
    }
}

/// Readability pass over the raw page: isolate the dominant article
/// node and render it as markdown. Images and SVG are dropped — only
/// the text ever reaches the scorer.
fn readability_markdown(body: &[u8], url: &str) -> String {
    let parsed_url = url::Url::parse(url).ok();
    transform_content_input(
        TransformInput {
            url: parsed_url.as_ref(),
            content: body,
            screenshot_bytes: None,
            encoding: None,
            selector_config: None,
            ignore_tags: None,
        },
        &TransformConfig {
            readability: true,
            main_content: true,
            return_format: ReturnFormat::Markdown,
            filter_images: true,
            filter_svg: true,
            clean_html: true,
        },
    )
}

fn is_pdf(content_type: Option<&str>, url: &str) -> bool {
    if let Some(ct) = content_type {
        if ct.to_ascii_lowercase().contains("application/pdf") {
            return true;
        }
    }
    url.split(['?', '#'])
        .next()
        .is_some_and(|path| path.to_ascii_lowercase().ends_with(".pdf"))
}

/// Pick the dominant content container: the longest `<article>`/`<main>`
/// block, or the concatenated `<p>` cluster when neither is present.
fn main_content_text(html: &str) -> String {
    let best_container = ARTICLE_RE
        .captures_iter(html)
        .chain(MAIN_RE.captures_iter(html))
        .map(|c| strip_tags(&c[1]))
        .max_by_key(|t| t.len());
    if let Some(text) = best_container {
        if !text.is_empty() {
            return text;
        }
    }

    let paragraphs: Vec<String> = PARAGRAPH_RE
        .captures_iter(html)
        .map(|c| strip_tags(&c[1]))
        .filter(|t| !t.is_empty())
        .collect();
    paragraphs.join(" ")
}

fn extract_title(html: &str) -> Option<String> {
    for re in [&*TITLE_RE, &*OG_TITLE_RE, &*H1_RE] {
        if let Some(caps) = re.captures(html) {
            let title = strip_tags(&caps[1]);
            if !title.is_empty() {
                return Some(title);
            }
        }
    }
    None
}
