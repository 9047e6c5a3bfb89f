// Shared HTML-to-text helpers for the extractor and citation parser.

use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<nav\b[^>]*>.*?</nav>|<footer\b[^>]*>.*?</footer>|<aside\b[^>]*>.*?</aside>|<noscript\b[^>]*>.*?</noscript>",
    )
    .expect("valid regex")
});

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

/// Remove all markup from an HTML fragment, leaving decoded text.
pub(crate) fn strip_tags(html: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(html, " ");
    let stripped = TAG_RE.replace_all(&without_comments, " ");
    collapse_whitespace(&decode_entities(&stripped))
}

/// Remove boilerplate containers before stripping. The fallback tier.
pub(crate) fn strip_boilerplate(html: &str) -> String {
    let cleaned = BOILERPLATE_RE.replace_all(html, " ");
    strip_tags(&cleaned)
}

/// Decode the handful of entities that matter for prose.
pub(crate) fn decode_entities(s: &str) -> String {
    let mut out = s
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}");
    // Numeric references, decimal only.
    static NUMERIC_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"&#(\d+);").expect("valid regex"));
    if NUMERIC_RE.is_match(&out) {
        out = NUMERIC_RE
            .replace_all(&out, |caps: &regex::Captures| {
                caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            })
            .into_owned();
    }
    out
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        let html = "<p>Hello   <b>world</b></p>\n<p>again</p>";
        assert_eq!(strip_tags(html), "Hello world again");
    }

    #[test]
    fn decodes_common_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&#8212; &#65;"), "\u{2014} A");
    }

    #[test]
    fn boilerplate_containers_are_dropped() {
        let html = "<nav>menu</nav><p>content</p><script>var x;</script><footer>(c)</footer>";
        assert_eq!(strip_boilerplate(html), "content");
    }

    #[test]
    fn comments_are_removed() {
        assert_eq!(strip_tags("before<!-- hidden -->after"), "before after");
    }
}
