//! Deterministic cache keys.
//!
//! Every logical query maps to exactly one key string, so the same question
//! asked twice (or across restarts) lands on the same cache entry.

use std::fmt;

use sha2::{Digest, Sha256};

/// A non-empty cache key.
///
/// Built through the namespace constructors; [`FetchCache`](crate::FetchCache)
/// treats the inner string as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Bestseller list for one category: `books:<category-id>`.
    pub fn books(category_id: &str) -> Self {
        CacheKey(format!("books:{}", category_id.trim()))
    }

    /// Keyword search: `search:<sha256 of the trimmed, lowercased keyword>`.
    pub fn search(keyword: &str) -> Self {
        let normalized = keyword.trim().to_lowercase();
        CacheKey(format!("search:{}", sha256_hex(&normalized)))
    }

    /// Book details by ISBN: `book:<isbn>` with dashes and spaces removed.
    pub fn book(isbn: &str) -> Self {
        CacheKey(format!("book:{}", normalize_isbn(isbn)))
    }

    /// Award winners in a year range: `award:<key>:<start>-<end>`.
    pub fn award(award_key: &str, start_year: i32, end_year: i32) -> Self {
        CacheKey(format!("award:{award_key}:{start_year}-{end_year}"))
    }

    /// Wrap a raw key. Returns `None` for an empty string.
    pub fn raw(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(CacheKey(key)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip the separators people type into ISBNs.
pub fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .collect()
}

pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn books_key() {
        assert_eq!(
            CacheKey::books("hardcover-fiction").as_str(),
            "books:hardcover-fiction"
        );
    }

    #[test]
    fn search_key_is_normalized() {
        let a = CacheKey::search("  Dune ");
        let b = CacheKey::search("dune");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("search:"));
        // "search:" + 64 hex chars
        assert_eq!(a.as_str().len(), 7 + 64);
        assert_ne!(a, CacheKey::search("dunes"));
    }

    #[test]
    fn book_key_strips_separators() {
        assert_eq!(
            CacheKey::book("978-0 441-01359-3").as_str(),
            "book:9780441013593"
        );
    }

    #[test]
    fn award_key() {
        assert_eq!(
            CacheKey::award("hugo", 2000, 2024).to_string(),
            "award:hugo:2000-2024"
        );
    }

    #[test]
    fn raw_rejects_empty() {
        assert!(CacheKey::raw("").is_none());
        assert_eq!(CacheKey::raw("x").unwrap().as_str(), "x");
    }
}
