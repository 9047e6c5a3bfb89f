//! Wikipedia citation extraction.
//!
//! Parses a rendered Wikipedia article into external-reference
//! candidates: anchors in the References / Further reading / External
//! links sections, plus `external`-classed anchors elsewhere on the
//! page. Wiki-internal and malformed targets are dropped; the result is
//! deduplicated by canonical URL within the page.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use patchwork_common::{CitationCandidate, CitationSection};

use crate::canonical::{canonicalize, UrlClass};
use crate::text::strip_tags;

/// Maximum stored length of the surrounding-text context.
const MAX_CONTEXT_CHARS: usize = 240;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)id\s*=\s*["'](References|Further_reading|External_links)["']"#)
        .expect("valid regex")
});

static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<li\b[^>]*>(.*?)</li>").expect("valid regex"));

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\s+([^>]*)>(.*?)</a>").expect("valid regex"));

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

static CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class\s*=\s*["']([^"']*)["']"#).expect("valid regex"));

/// Extract external citation candidates from a Wikipedia page.
pub fn extract_citations(html: &str, _page_url: &str) -> Vec<CitationCandidate> {
    let sections = section_ranges(html);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    // Recognized sections first: list items carry ordinal + context.
    for range in &sections {
        let body = &html[range.start..range.end];
        for (ordinal, li) in LIST_ITEM_RE.captures_iter(body).enumerate() {
            let li_html = &li[1];
            let context = item_context(li_html);
            for anchor in ANCHOR_RE.captures_iter(li_html) {
                let Some(candidate) = candidate_from_anchor(
                    &anchor[1],
                    &anchor[2],
                    range.section,
                    ordinal_for(range.section, ordinal),
                    context.as_deref(),
                ) else {
                    continue;
                };
                if seen.insert(candidate.canonical_url.clone()) {
                    out.push(candidate);
                }
            }
        }
    }

    // Everything else: only explicitly external-classed anchors, no ordinal.
    for anchor in ANCHOR_RE.captures_iter(html) {
        let pos = anchor.get(0).map(|m| m.start()).unwrap_or(0);
        if sections.iter().any(|r| r.start <= pos && pos < r.end) {
            continue;
        }
        let attrs = &anchor[1];
        let is_external_class = CLASS_RE
            .captures(attrs)
            .is_some_and(|c| c[1].split_whitespace().any(|cls| cls == "external"));
        if !is_external_class {
            continue;
        }
        let Some(candidate) =
            candidate_from_anchor(attrs, &anchor[2], CitationSection::Unknown, None, None)
        else {
            continue;
        };
        if seen.insert(candidate.canonical_url.clone()) {
            out.push(candidate);
        }
    }

    out
}

struct SectionRange {
    section: CitationSection,
    start: usize,
    end: usize,
}

/// Locate the recognized reference sections by their heading anchors.
/// Each section runs to the next recognized heading (or end of page).
fn section_ranges(html: &str) -> Vec<SectionRange> {
    let mut marks: Vec<(usize, CitationSection)> = SECTION_RE
        .captures_iter(html)
        .filter_map(|c| {
            let section = match c[1].to_ascii_lowercase().as_str() {
                "references" => CitationSection::References,
                "further_reading" => CitationSection::FurtherReading,
                "external_links" => CitationSection::ExternalLinks,
                _ => return None,
            };
            c.get(0).map(|m| (m.start(), section))
        })
        .collect();
    marks.sort_by_key(|(pos, _)| *pos);

    marks
        .iter()
        .enumerate()
        .map(|(i, (start, section))| SectionRange {
            section: *section,
            start: *start,
            end: marks.get(i + 1).map(|(p, _)| *p).unwrap_or(html.len()),
        })
        .collect()
}

fn ordinal_for(section: CitationSection, index: usize) -> Option<i32> {
    match section {
        CitationSection::References => Some(index as i32 + 1),
        _ => None,
    }
}

fn candidate_from_anchor(
    attrs: &str,
    inner_html: &str,
    section: CitationSection,
    source_number: Option<i32>,
    context: Option<&str>,
) -> Option<CitationCandidate> {
    let href = HREF_RE.captures(attrs)?[1].to_string();
    // Wikipedia emits protocol-relative hrefs for some archives.
    let href = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        href
    };

    let canonical = canonicalize(&href);
    if canonical.classification != UrlClass::External {
        return None;
    }

    let title = {
        let t = strip_tags(inner_html);
        (!t.is_empty()).then_some(t)
    };

    Some(CitationCandidate {
        url: href,
        canonical_url: canonical.canonical_url,
        title,
        context: context.map(|c| c.to_string()),
        section,
        source_number,
    })
}

fn item_context(li_html: &str) -> Option<String> {
    let text = strip_tags(li_html);
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_CONTEXT_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_item(n: usize, url: &str, label: &str) -> String {
        format!(
            r#"<li id="cite_note-{n}"><span class="reference-text"><cite class="citation web">
            <a rel="nofollow" class="external text" href="{url}">{label}</a>. Publisher. Retrieved 2024-01-01.</cite></span></li>"#
        )
    }

    fn page_with(references: &[String], further: &[String], external: &[String]) -> String {
        format!(
            r#"<html><body>
            <p>Body text with an <a href="/wiki/Internal_Link">internal link</a>.</p>
            <h2 id="References">References</h2>
            <ol class="references">{}</ol>
            <h2 id="Further_reading">Further reading</h2>
            <ul>{}</ul>
            <h2 id="External_links">External links</h2>
            <ul>{}</ul>
            </body></html>"#,
            references.join("\n"),
            further.join("\n"),
            external.join("\n"),
        )
    }

    // --- section + ordinal assignment ---

    #[test]
    fn references_get_ordinals_in_page_order() {
        let page = page_with(
            &[
                reference_item(1, "https://first.example.com/a", "First"),
                reference_item(2, "https://second.example.com/b", "Second"),
            ],
            &[],
            &[],
        );
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].section, CitationSection::References);
        assert_eq!(candidates[0].source_number, Some(1));
        assert_eq!(candidates[1].source_number, Some(2));
        assert_eq!(candidates[0].title.as_deref(), Some("First"));
    }

    #[test]
    fn further_reading_and_external_links_have_no_ordinal() {
        let page = page_with(
            &[],
            &[r#"<li><a class="external text" href="https://book.example.com/x">A Book</a></li>"#.to_string()],
            &[r#"<li><a class="external text" href="https://site.example.com">Official site</a></li>"#.to_string()],
        );
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].section, CitationSection::FurtherReading);
        assert_eq!(candidates[0].source_number, None);
        assert_eq!(candidates[1].section, CitationSection::ExternalLinks);
    }

    // --- filtering ---

    #[test]
    fn wiki_internal_and_malformed_links_are_dropped() {
        let page = page_with(
            &[
                reference_item(1, "https://en.wikipedia.org/wiki/Other", "Wiki"),
                reference_item(2, "https://commons.wikimedia.org/wiki/File:X.jpg", "Commons"),
                reference_item(3, "not a url at all", "Broken"),
                reference_item(4, "https://kept.example.com/ok", "Kept"),
            ],
            &[],
            &[],
        );
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].canonical_url, "https://kept.example.com/ok");
        // Ordinal reflects position in the list, not position among survivors.
        assert_eq!(candidates[0].source_number, Some(4));
    }

    #[test]
    fn duplicate_urls_collapse_to_one_candidate() {
        let page = page_with(
            &[
                reference_item(1, "https://example.com/paper", "Paper"),
                reference_item(2, "https://example.com/paper/", "Paper again"),
                reference_item(3, "https://example.com/paper?utm_source=wiki", "Tracked"),
            ],
            &[],
            &[],
        );
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].canonical_url, "https://example.com/paper");
    }

    #[test]
    fn protocol_relative_hrefs_resolve_to_https() {
        let page = page_with(
            &[reference_item(1, "//web.archive.example.org/item", "Archived")],
            &[],
            &[],
        );
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].url.starts_with("https://web.archive.example.org"));
    }

    // --- context ---

    #[test]
    fn context_carries_surrounding_citation_text() {
        let page = page_with(
            &[reference_item(1, "https://journal.example.com/a", "Study")],
            &[],
            &[],
        );
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        let context = candidates[0].context.as_deref().unwrap();
        assert!(context.contains("Publisher"));
        assert!(context.contains("Retrieved"));
    }

    #[test]
    fn context_is_capped() {
        let long_tail = "word ".repeat(200);
        let item = format!(
            r#"<li><a class="external text" href="https://example.com/long">L</a> {long_tail}</li>"#
        );
        let page = page_with(&[item], &[], &[]);
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        let context = candidates[0].context.as_deref().unwrap();
        assert!(context.chars().count() <= MAX_CONTEXT_CHARS);
    }

    // --- body links ---

    #[test]
    fn external_classed_body_links_land_in_unknown() {
        let html = r#"<html><body>
            <p>Inline <a class="external text" href="https://inline.example.com/ref">source</a>.</p>
            <h2 id="References">References</h2><ol></ol>
            </body></html>"#;
        let candidates = extract_citations(html, "https://en.wikipedia.org/wiki/X");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].section, CitationSection::Unknown);
        assert_eq!(candidates[0].source_number, None);
    }

    #[test]
    fn plain_body_anchors_are_ignored() {
        let html = r#"<html><body>
            <p><a href="https://unclassed.example.com/x">plain</a></p>
            </body></html>"#;
        let candidates = extract_citations(html, "https://en.wikipedia.org/wiki/X");
        assert!(candidates.is_empty());
    }

    // --- the S1 shape: mixed page ---

    #[test]
    fn mixed_page_keeps_only_unique_external_urls() {
        let mut refs = Vec::new();
        for i in 0..10 {
            refs.push(reference_item(i, &format!("https://ext{i}.example.com/a"), "ok"));
        }
        for i in 10..13 {
            refs.push(reference_item(i, "https://en.wikipedia.org/wiki/Internal", "wiki"));
        }
        refs.push(reference_item(13, "::malformed::", "bad"));
        refs.push(reference_item(14, "https://ext0.example.com/a", "dupe"));

        let page = page_with(&refs, &[], &[]);
        let candidates = extract_citations(&page, "https://en.wikipedia.org/wiki/X");
        assert_eq!(candidates.len(), 10);
        assert!(candidates.iter().all(|c| c.section == CitationSection::References));
    }
}
