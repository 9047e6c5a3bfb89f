//! URL canonicalization and host classification.
//!
//! Every URL entering the pipeline is reduced to a stable canonical key
//! so dedup constraints hold across syntactic variants. Canonicalization
//! never fails: malformed input comes back classified as `Blocked`.

use url::Url;

/// Query keys stripped during canonicalization (tracking noise).
const TRACKING_KEYS: &[&str] = &["fbclid", "gclid", "ref", "ref_src"];

/// Registries where the registrable domain spans three labels.
const TWO_LEVEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "com.au", "net.au", "org.au", "co.jp",
    "or.jp", "ne.jp", "ac.jp", "co.nz", "org.nz", "com.br", "com.mx", "co.in", "co.kr",
    "com.cn", "com.sg", "com.tr", "com.ar", "co.za",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlClass {
    /// wikipedia.org, or a relative `/wiki/` path. Excluded from processing.
    WikipediaInternal,
    /// wikimedia.org / wikidata.org infrastructure hosts.
    Wikimedia,
    /// Malformed or non-http(s). Never fetched.
    Blocked,
    External,
}

#[derive(Debug, Clone)]
pub struct Canonical {
    pub canonical_url: String,
    pub host: String,
    /// Rate-limiter key: the registrable portion of the host.
    pub registrable_domain: String,
    pub classification: UrlClass,
}

impl Canonical {
    fn blocked(raw: &str) -> Self {
        Self {
            canonical_url: raw.to_string(),
            host: String::new(),
            registrable_domain: String::new(),
            classification: UrlClass::Blocked,
        }
    }
}

/// Canonicalize a raw URL. Rules, in order: reject non-http(s); lowercase
/// host and strip leading `www.`; drop the fragment; strip tracking query
/// keys; sort remaining query keys; collapse duplicate slashes; trim the
/// trailing slash except on root; percent-decode unreserved characters.
pub fn canonicalize(raw: &str) -> Canonical {
    let trimmed = raw.trim();

    // Wiki-relative hrefs never leave the encyclopedia.
    if trimmed.starts_with("./") || trimmed.starts_with("/wiki/") {
        return Canonical {
            canonical_url: trimmed.to_string(),
            host: String::new(),
            registrable_domain: String::new(),
            classification: UrlClass::WikipediaInternal,
        };
    }

    let parsed = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return Canonical::blocked(trimmed),
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Canonical::blocked(trimmed);
    }

    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return Canonical::blocked(trimmed),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let classification = classify_host(&host);
    let registrable = registrable_domain(&host);

    let path = canonical_path(parsed.path());
    let query = canonical_query(parsed.query());

    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(&path);
    if let Some(q) = query {
        out.push('?');
        out.push_str(&q);
    }

    Canonical {
        canonical_url: out,
        host,
        registrable_domain: registrable,
        classification,
    }
}

fn classify_host(host: &str) -> UrlClass {
    if host == "wikipedia.org" || host.ends_with(".wikipedia.org") {
        return UrlClass::WikipediaInternal;
    }
    for infra in ["wikimedia.org", "wikidata.org"] {
        if host == infra || host.ends_with(&format!(".{infra}")) {
            return UrlClass::Wikimedia;
        }
    }
    UrlClass::External
}

/// Registrable portion of a host: the last two labels, or three when the
/// suffix is a known two-level registry (`example.co.uk`). IP literals
/// and single-label hosts pass through unchanged.
pub fn registrable_domain(host: &str) -> String {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host.to_string();
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let take = if TWO_LEVEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    labels[labels.len().saturating_sub(take)..].join(".")
}

fn canonical_path(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }
    if collapsed.is_empty() {
        collapsed.push('/');
    }
    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }
    decode_unreserved(&collapsed)
}

fn canonical_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    // Decode before sorting — sort order must match what a second pass sees.
    let mut parts: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let key = p.split('=').next().unwrap_or(p);
            !is_tracking_key(key)
        })
        .map(decode_unreserved)
        .collect();
    if parts.is_empty() {
        return None;
    }
    parts.sort_unstable();
    Some(parts.join("&"))
}

fn is_tracking_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_KEYS.contains(&lower.as_str())
}

/// Decode `%XX` escapes only when the target is an unreserved character
/// (ALPHA / DIGIT / `-` / `.` / `_` / `~`). Reserved escapes keep their
/// encoded form so semantics never change.
fn decode_unreserved(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &s[i + 1..i + 3];
            if let Ok(v) = u8::from_str_radix(hex, 16) {
                let c = v as char;
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
                    out.push(c);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}
