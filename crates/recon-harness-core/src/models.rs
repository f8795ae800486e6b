//! Core data models used throughout Recon Harness.
//!
//! A [`Fragment`] is the atomic retrievable unit every extractor produces.
//! [`FileRecord`] and [`ReconRecord`] are the append-only audit records the
//! coordinators write to the metadata store. The `keys` helpers build the
//! hierarchical object-storage layout.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Open mapping from metadata keys to scalar JSON values.
pub type Metadata = serde_json::Map<String, Value>;

/// Well-known fragment metadata keys.
pub mod meta {
    pub const SOURCE_URI: &str = "source_uri";
    /// Exact stored object for fragments whose `source_uri` is folder-level.
    pub const SOURCE_FILE: &str = "source_file";
    pub const BATCH_ID: &str = "batch_id";
    pub const PAGE: &str = "page";
    pub const TABLE: &str = "table";
    pub const ROW: &str = "row";
    pub const COL: &str = "col";
    pub const SLIDE: &str = "slide";
    pub const SHEET: &str = "sheet";
}

/// Smallest retrievable unit of extracted text plus structural metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl Fragment {
    /// Create a fragment with a freshly generated id.
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            metadata,
        }
    }

    pub fn source_uri(&self) -> Option<&str> {
        self.metadata.get(meta::SOURCE_URI).and_then(Value::as_str)
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.metadata.get(meta::BATCH_ID).and_then(Value::as_str)
    }

    /// Stamp the ingestion batch. The only mutation a fragment sees after
    /// extraction.
    pub fn stamp_batch(&mut self, batch_id: &BatchId) {
        self.metadata.insert(
            meta::BATCH_ID.to_string(),
            Value::String(batch_id.to_string()),
        );
    }
}

/// Builder for fragment metadata, always seeded with `source_uri`.
#[derive(Debug, Clone)]
pub struct MetadataBuilder(Metadata);

impl MetadataBuilder {
    pub fn new(source_uri: &str) -> Self {
        let mut map = Metadata::new();
        map.insert(
            meta::SOURCE_URI.to_string(),
            Value::String(source_uri.to_string()),
        );
        Self(map)
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Metadata {
        self.0
    }
}

/// Identifier of one ingestion run: `batch-` followed by eight hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub const PREFIX: &'static str = "batch-";

    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}{}", Self::PREFIX, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque unique identifier (UUID v4, simple hex form).
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// SHA-256 of the exact stored bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// One uploaded source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub use_case: String,
    pub file_id: String,
    pub storage_uri: String,
    pub object_key: String,
    pub sha256: String,
    pub batch_id: BatchId,
    pub meta: Metadata,
    pub uploaded_at: DateTime<Utc>,
}

/// A fragment the generation step actually drew on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub fragment_id: Option<String>,
    pub metadata: Metadata,
}

/// Persisted audit trail of one query and the fragments it used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconRecord {
    pub recon_id: String,
    pub use_case: String,
    pub kb_id: String,
    pub batch_id: Option<String>,
    pub prompt: String,
    pub model: Option<String>,
    pub raw_response: Value,
    pub references: Vec<Reference>,
    pub created_at: DateTime<Utc>,
}

/// Storage key layout under a use case.
pub mod keys {
    /// Object area a fragment is written to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FragmentArea {
        /// OCR, slide, and line fragments.
        KbChunks,
        /// Tabular row fragments.
        StructuredRows,
    }

    impl FragmentArea {
        fn dir(self) -> &'static str {
            match self {
                FragmentArea::KbChunks => "kb_chunks",
                FragmentArea::StructuredRows => "structured_rows",
            }
        }
    }

    pub fn incoming_key(use_case: &str, batch_id: &str, timestamp: i64, filename: &str) -> String {
        format!(
            "usecase/{}/incoming/{}/{}-{}",
            use_case, batch_id, timestamp, filename
        )
    }

    pub fn incoming_folder_uri(bucket: &str, use_case: &str, batch_id: &str) -> String {
        format!("s3://{}/usecase/{}/incoming/{}/", bucket, use_case, batch_id)
    }

    pub fn fragment_key(
        area: FragmentArea,
        use_case: &str,
        batch_id: &str,
        fragment_id: &str,
    ) -> String {
        format!(
            "usecase/{}/{}/{}/{}.json",
            use_case,
            area.dir(),
            batch_id,
            fragment_id
        )
    }

    pub fn s3_uri(bucket: &str, key: &str) -> String {
        format!("s3://{}/{}", bucket, key)
    }

    /// Split `s3://bucket/key` into `(bucket, key)`. Returns `None` when the
    /// scheme is wrong or either part is empty.
    pub fn parse_s3_uri(uri: &str) -> Option<(&str, &str)> {
        let rest = uri.strip_prefix("s3://")?;
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some((bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::keys::*;
    use super::*;

    #[test]
    fn batch_id_has_prefix_and_hex_suffix() {
        let id = BatchId::generate();
        let suffix = id.as_str().strip_prefix(BatchId::PREFIX).unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, BatchId::generate());
    }

    #[test]
    fn content_hash_depends_only_on_bytes() {
        let a = content_hash(b"amount,currency\n10,EUR\n");
        let b = content_hash(b"amount,currency\n10,EUR\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(b"amount,currency\n11,EUR\n"));
    }

    #[test]
    fn stamp_batch_sets_metadata_key() {
        let mut f = Fragment::new("x", MetadataBuilder::new("s3://b/k").build());
        assert_eq!(f.batch_id(), None);
        f.stamp_batch(&BatchId::from("batch-aaaa1111"));
        assert_eq!(f.batch_id(), Some("batch-aaaa1111"));
        assert_eq!(f.source_uri(), Some("s3://b/k"));
    }

    #[test]
    fn key_layout() {
        assert_eq!(
            incoming_key("payments", "batch-1", 1700000000, "ledger.csv"),
            "usecase/payments/incoming/batch-1/1700000000-ledger.csv"
        );
        assert_eq!(
            fragment_key(FragmentArea::StructuredRows, "payments", "batch-1", "abc"),
            "usecase/payments/structured_rows/batch-1/abc.json"
        );
        assert_eq!(
            fragment_key(FragmentArea::KbChunks, "payments", "batch-1", "abc"),
            "usecase/payments/kb_chunks/batch-1/abc.json"
        );
    }

    #[test]
    fn parse_s3_uri_rejects_malformed() {
        assert_eq!(
            parse_s3_uri("s3://bucket/a/b.xlsx"),
            Some(("bucket", "a/b.xlsx"))
        );
        assert_eq!(parse_s3_uri("https://bucket/a"), None);
        assert_eq!(parse_s3_uri("s3://bucket"), None);
        assert_eq!(parse_s3_uri("s3://bucket/"), None);
    }
}
