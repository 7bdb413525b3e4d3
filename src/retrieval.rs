//! The `search_pdfs` retrieval tool.
//!
//! Embeds the query with the query-side prefix, runs a similarity search,
//! and maps hits into citable results. An empty result set is a valid
//! answer ("no evidence found") and is distinct from a tool failure.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::embedding::{EmbedMode, Embedder};
use crate::error::{Error, Result};
use crate::index::IndexStore;
use crate::models::{citation_tag, RetrievalHit};

pub const TOOL_NAME: &str = "search_pdfs";

pub struct RetrievalTool {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    top_k_default: usize,
    min_score: f32,
}

impl RetrievalTool {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        top_k_default: usize,
        min_score: f32,
    ) -> Self {
        Self {
            embedder,
            store,
            top_k_default,
            min_score,
        }
    }

    pub fn description() -> &'static str {
        "Search the ingested utility-bill PDFs and return the most relevant passages, \
         each with a citation_tag to cite in the answer"
    }

    /// OpenAI function-calling parameter schema for this tool.
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language question about the ingested bills"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of passages to return"
                }
            },
            "required": ["query"]
        })
    }

    /// Run the search. Hits below the similarity threshold are dropped;
    /// what remains is ordered by score descending (chunk id ascending on
    /// ties, inherited from the store contract).
    pub async fn search_pdfs(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalHit>> {
        if query.trim().is_empty() {
            return Err(Error::ToolArgument("query must not be empty".to_string()));
        }
        let limit = top_k.unwrap_or(self.top_k_default).max(1);

        let embeddings = self
            .embedder
            .embed(&[query.to_string()], EmbedMode::Query)
            .await?;
        let query_vec = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))?;

        let hits = self.store.search(&query_vec, limit).await?;

        Ok(hits
            .into_iter()
            .filter(|h| h.score >= self.min_score)
            .map(|h| RetrievalHit {
                citation_tag: citation_tag(&h.chunk.document_id, h.chunk.chunk_index),
                document_id: h.chunk.document_id,
                chunk_index: h.chunk.chunk_index,
                score: h.score,
                text: h.chunk.source_text,
            })
            .collect())
    }
}
