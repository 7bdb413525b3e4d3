//! Incremental ingestion orchestration.
//!
//! Drives source → extract → chunk → embed → index for every document that
//! is new or changed. "Already indexed" is derived from the index store
//! itself (distinct content versions per document), never from a side
//! ledger, so the pipeline cannot drift from what the store actually holds.
//!
//! Per-document failures are recorded and the batch continues; one corrupt
//! PDF never aborts a run. Stale versions are deleted only after the new
//! version's records are fully written, so an interrupted run leaves the
//! previous version queryable instead of leaving a document unindexed.

use tracing::{info, warn};

use crate::chunk::{chunk_text, ChunkParams};
use crate::embedding::{EmbedMode, Embedder};
use crate::error::{Error, Result};
use crate::extract;
use crate::index::IndexStore;
use crate::models::{DocumentRef, IndexRecord};
use crate::source::DocumentSource;

/// Outcome summary for one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Documents re-indexed this run.
    pub indexed: Vec<String>,
    /// Documents whose indexed version already matched the source.
    pub skipped: Vec<String>,
    /// Documents that failed, with the reason. These do not abort the run.
    pub failed: Vec<(String, String)>,
}

impl IngestReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run one full ingestion pass over the source.
pub async fn run_ingest(
    source: &dyn DocumentSource,
    embedder: &dyn Embedder,
    store: &dyn IndexStore,
    params: ChunkParams,
    embed_batch_size: usize,
) -> Result<IngestReport> {
    store.ensure_ready(embedder.dims()).await?;

    let documents = source.list_documents().await?;
    info!(
        count = documents.len(),
        source = %source.describe(),
        "listed documents"
    );

    let mut report = IngestReport::default();

    for doc in &documents {
        match store.indexed_version(&doc.document_id).await {
            Ok(Some(version)) if version == doc.content_version => {
                report.skipped.push(doc.document_id.clone());
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(document = %doc.document_id, error = %e, "failed to read indexed state");
                report.failed.push((doc.document_id.clone(), e.to_string()));
                continue;
            }
        }

        match index_document(source, embedder, store, params, embed_batch_size, doc).await {
            Ok(chunk_count) => {
                info!(
                    document = %doc.document_id,
                    version = %doc.content_version,
                    chunks = chunk_count,
                    "indexed"
                );
                report.indexed.push(doc.document_id.clone());
            }
            Err(e) => {
                warn!(document = %doc.document_id, error = %e, "skipping document");
                report.failed.push((doc.document_id.clone(), e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Index one document at its current content version, then drop every
/// other version it still has in the store.
async fn index_document(
    source: &dyn DocumentSource,
    embedder: &dyn Embedder,
    store: &dyn IndexStore,
    params: ChunkParams,
    embed_batch_size: usize,
    doc: &DocumentRef,
) -> Result<usize> {
    let bytes = source.get_content(&doc.document_id).await?;
    let text = extract::extract_text(&doc.document_id, &bytes)?;

    let chunks = chunk_text(&doc.document_id, &doc.content_version, &text, params);
    if chunks.is_empty() {
        return Err(Error::Extraction {
            document_id: doc.document_id.clone(),
            reason: "document produced no chunks".to_string(),
        });
    }

    // Embed everything before writing anything, so a mid-batch embedding
    // failure leaves the store untouched.
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(embed_batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        vectors.extend(embedder.embed(&texts, EmbedMode::Document).await?);
    }

    let records: Vec<IndexRecord> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| IndexRecord {
            chunk_id: chunk.chunk_id,
            document_id: chunk.document_id,
            content_version: chunk.content_version,
            chunk_index: chunk.chunk_index,
            source_text: chunk.text,
            embedding,
        })
        .collect();

    store.upsert_batch(&records).await?;

    // Only now is it safe to retire older versions.
    for version in store.versions(&doc.document_id).await? {
        if version != doc.content_version {
            store.delete_version(&doc.document_id, &version).await?;
        }
    }

    Ok(records.len())
}
