//! Core data types that flow through the ingestion and retrieval pipeline.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A document as listed by a source: a stable id plus the opaque token that
/// changes exactly when the content changes (S3 ETag, or a hash of the
/// bytes for local files).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub document_id: String,
    pub content_version: String,
}

/// A contiguous slice of a document's extracted text. Offsets and lengths
/// are measured in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content_version: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub text: String,
}

/// A chunk plus its embedding, ready to be written to the vector store.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub chunk_id: String,
    pub document_id: String,
    pub content_version: String,
    pub chunk_index: usize,
    pub source_text: String,
    pub embedding: Vec<f32>,
}

/// One retrieval result as handed to the agent (and serialized into tool
/// results).
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub document_id: String,
    pub chunk_index: usize,
    pub score: f32,
    pub text: String,
    pub citation_tag: String,
}

/// Deterministic chunk id: a UUID carved out of
/// SHA-256(document_id, content_version, chunk_index).
///
/// Re-deriving the id for the same inputs always yields the same value,
/// which makes vector-store upserts naturally idempotent: a retried batch
/// overwrites itself instead of duplicating records.
pub fn chunk_id(document_id: &str, content_version: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(content_version.as_bytes());
    hasher.update([0x1f]);
    hasher.update(chunk_index.to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Citation tag rendered into tool results and answers,
/// e.g. `[acme-2024-03.pdf#2]`. The index is the within-document chunk
/// index, which keeps tags short and readable.
pub fn citation_tag(document_id: &str, chunk_index: usize) -> String {
    format!("[{}#{}]", document_id, chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = chunk_id("bills/acme.pdf", "etag-1", 3);
        let b = chunk_id("bills/acme.pdf", "etag-1", 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_id_distinct_per_field() {
        let base = chunk_id("bills/acme.pdf", "etag-1", 0);
        assert_ne!(base, chunk_id("bills/other.pdf", "etag-1", 0));
        assert_ne!(base, chunk_id("bills/acme.pdf", "etag-2", 0));
        assert_ne!(base, chunk_id("bills/acme.pdf", "etag-1", 1));
    }

    #[test]
    fn test_chunk_id_is_uuid() {
        let id = chunk_id("doc", "v", 0);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_citation_tag_format() {
        assert_eq!(citation_tag("acme-2024-03.pdf", 2), "[acme-2024-03.pdf#2]");
    }
}
