pub mod config;
pub mod types;

pub use config::Config;
pub use types::*;

use sha2::{Digest, Sha256};

/// Deterministic 128-bit content hash, hex-encoded (32 chars): the
/// first 16 bytes of SHA-256 over `title ‖ '\n' ‖ summary ‖ '\n' ‖ text`.
/// Rows hashed on different machines and different days must agree, so
/// no `DefaultHasher` here.
pub fn content_hash(title: &str, summary: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(summary.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Truncate a string to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = content_hash("Title", "Summary", "Body text");
        let b = content_hash("Title", "Summary", "Body text");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_is_128_bit_hex() {
        let h = content_hash("t", "s", "x");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_separates_fields() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = content_hash("ab", "c", "");
        let b = content_hash("a", "bc", "");
        assert_ne!(a, b);
    }

    #[test]
    fn truncate_respects_char_boundary() {
        let s = "héllo wörld";
        let t = truncate_to_boundary(s, 2);
        assert!(t.len() <= 2);
        assert!(s.starts_with(t));
    }

    #[test]
    fn truncate_noop_when_short() {
        assert_eq!(truncate_to_boundary("abc", 10), "abc");
    }
}
