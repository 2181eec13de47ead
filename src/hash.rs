//! Canonical content hashing (component A).
//!
//! Every derived artifact is addressed by the SHA-256 of its canonical bytes,
//! rendered as `sha256:<lowercase-hex>`. This is the only hash form the rest
//! of the crate is allowed to compare against.

use sha2::{Digest, Sha256};

const PREFIX: &str = "sha256:";

/// Hash raw bytes into the canonical `sha256:<hex>` form.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{PREFIX}{:x}", hasher.finalize())
}

/// Hash a UTF-8 string into the canonical `sha256:<hex>` form.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Hash the concatenation of `id:hash` pairs in iteration order, used for the
/// FTS content-integrity hash (`sha256(concat(chunk_id:chunk_text_hash ...))`).
pub fn hash_concat<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut hasher = Sha256::new();
    for (id, h) in pairs {
        hasher.update(id.as_bytes());
        hasher.update(b":");
        hasher.update(h.as_bytes());
    }
    format!("{PREFIX}{:x}", hasher.finalize())
}

/// True iff `s` is a syntactically valid canonical hash (`sha256:` + 64 hex chars).
pub fn is_canonical(s: &str) -> bool {
    match s.strip_prefix(PREFIX) {
        Some(hex) => hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_canonical_and_deterministic() {
        let h1 = hash_str("alpha");
        let h2 = hash_str("alpha");
        assert_eq!(h1, h2);
        assert!(is_canonical(&h1));
        assert!(h1.starts_with("sha256:"));
    }

    #[test]
    fn tamper_changes_hash() {
        let original = hash_str("alpha");
        let tampered = hash_str("alpha!");
        assert_ne!(original, tampered);
    }

    #[test]
    fn concat_hash_is_order_sensitive() {
        let a = hash_concat([("c1", "h1"), ("c2", "h2")]);
        let b = hash_concat([("c2", "h2"), ("c1", "h1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_non_canonical() {
        assert!(!is_canonical("not-a-hash"));
        assert!(!is_canonical("sha256:short"));
    }
}
