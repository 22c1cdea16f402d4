//! Structured items extracted from crawled pages

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A structured item produced by a page parser
///
/// The crawl engine treats the payload as opaque and passes the record to the
/// sink untouched. Deduplication across runs is the sink's job and is keyed by
/// `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Site-specific natural key (e.g. an item slug from the page URL)
    pub key: String,

    /// URL of the page the record was extracted from
    pub source_url: String,

    pub payload: serde_json::Value,

    /// Hex-encoded SHA-256 of the serialized payload
    pub content_hash: String,

    /// Raw HTML of the source page; stored when the record is new or changed
    #[serde(skip)]
    pub snapshot: Option<String>,
}

impl Record {
    pub fn new(key: impl Into<String>, source_url: impl Into<String>, payload: serde_json::Value) -> Self {
        let content_hash = compute_content_hash(&payload);
        Self {
            key: key.into(),
            source_url: source_url.into(),
            payload,
            content_hash,
            snapshot: None,
        }
    }

    /// Attaches the page HTML; it does not take part in change detection
    pub fn with_snapshot(mut self, html: impl Into<String>) -> Self {
        self.snapshot = Some(html.into());
        self
    }
}

/// Computes the content hash used for change detection
///
/// Object keys serialize in sorted order, so equal payloads always hash
/// equally regardless of how they were built.
pub fn compute_content_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_payloads_hash_equally() {
        let a = Record::new("k", "https://example.com/k", json!({"title": "A", "price": "1.00"}));
        let b = Record::new("k", "https://example.com/k/", json!({"price": "1.00", "title": "A"}));
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn test_snapshot_does_not_affect_hash() {
        let plain = Record::new("k", "u", json!({"title": "A"}));
        let with_html = Record::new("k", "u", json!({"title": "A"})).with_snapshot("<html></html>");
        assert_eq!(plain.content_hash, with_html.content_hash);
        assert_eq!(with_html.snapshot.as_deref(), Some("<html></html>"));
    }

    #[test]
    fn test_changed_payload_changes_hash() {
        let a = Record::new("k", "u", json!({"title": "A"}));
        let b = Record::new("k", "u", json!({"title": "B"}));
        assert_ne!(a.content_hash, b.content_hash);
    }
}
