//! In-memory [`IndexStore`] for tests and offline runs.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`; search is
//! brute-force cosine similarity over all stored vectors. Upserts replace
//! by chunk id, matching the keyed-write semantics of the real store.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::Result;
use crate::index::{rank_hits, IndexStore, SearchHit, StoredChunk};
use crate::models::IndexRecord;

#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<Vec<IndexRecord>>,
    upsert_calls: AtomicU64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-empty upsert calls seen. Lets tests assert that a
    /// no-op ingestion run really wrote nothing.
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl IndexStore for MemoryIndex {
    async fn ensure_ready(&self, _dims: usize) -> Result<()> {
        Ok(())
    }

    async fn versions(&self, document_id: &str) -> Result<Vec<String>> {
        let records = self.records.read().unwrap();
        let mut versions: Vec<String> = Vec::new();
        for record in records.iter().filter(|r| r.document_id == document_id) {
            if !versions.iter().any(|v| v == &record.content_version) {
                versions.push(record.content_version.clone());
            }
        }
        versions.sort();
        Ok(versions)
    }

    async fn upsert_batch(&self, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let mut stored = self.records.write().unwrap();
        for record in records {
            stored.retain(|r| r.chunk_id != record.chunk_id);
            stored.push(record.clone());
        }
        Ok(())
    }

    async fn delete_version(&self, document_id: &str, content_version: &str) -> Result<()> {
        let mut stored = self.records.write().unwrap();
        stored.retain(|r| {
            !(r.document_id == document_id && r.content_version == content_version)
        });
        Ok(())
    }

    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let records = self.records.read().unwrap();
        let mut hits: Vec<SearchHit> = records
            .iter()
            .map(|r| SearchHit {
                chunk: StoredChunk {
                    chunk_id: r.chunk_id.clone(),
                    document_id: r.document_id.clone(),
                    content_version: r.content_version.clone(),
                    chunk_index: r.chunk_index,
                    source_text: r.source_text.clone(),
                },
                score: cosine(query_embedding, &r.embedding),
            })
            .collect();

        rank_hits(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }
}
