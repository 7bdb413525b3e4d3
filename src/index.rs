//! Vector index abstraction and the HTTP vector-store client.
//!
//! The collection is keyed by chunk id (UUID point ids) with a cosine
//! vector field; `document_id`, `content_version`, `chunk_index`, and
//! `source_text` ride in the point payload. Because chunk ids are
//! content-derived, upserts are idempotent and retried writes overwrite
//! themselves.
//!
//! Ingestion state is read back out of the store itself: the set of
//! distinct `content_version` values present for a document tells the
//! orchestrator whether it is cleanly indexed, stale, or half-written.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::models::IndexRecord;

/// A stored chunk as returned from a similarity search.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content_version: String,
    pub chunk_index: usize,
    pub source_text: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: StoredChunk,
    pub score: f32,
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create the collection if it does not exist. Idempotent.
    async fn ensure_ready(&self, dims: usize) -> Result<()>;

    /// Distinct content versions currently stored for a document, sorted.
    async fn versions(&self, document_id: &str) -> Result<Vec<String>>;

    /// The version a document is cleanly indexed at. `None` when the
    /// document is absent or an interrupted run left more than one version
    /// behind; either way the caller re-indexes, which also cleans up.
    async fn indexed_version(&self, document_id: &str) -> Result<Option<String>> {
        let mut versions = self.versions(document_id).await?;
        if versions.len() == 1 {
            Ok(Some(versions.remove(0)))
        } else {
            Ok(None)
        }
    }

    /// Write a batch of records keyed by chunk id. All-or-nothing per call
    /// and safe to retry.
    async fn upsert_batch(&self, records: &[IndexRecord]) -> Result<()>;

    /// Remove every record a document has under one content version.
    async fn delete_version(&self, document_id: &str, content_version: &str) -> Result<()>;

    /// Top-k cosine similarity search. Descending score; equal scores
    /// ordered by chunk id ascending.
    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;
}

/// Deterministic ranking: score descending, chunk id ascending on ties.
pub fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}

// ============ HTTP client ============

/// Client for a Qdrant-compatible vector-store REST API.
pub struct HttpIndex {
    base_url: String,
    collection: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url(),
            collection: config.collection.clone(),
            client,
            max_retries: config.max_retries,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    /// Issue a JSON request with the shared transient-retry loop. `write`
    /// selects the error class for HTTP-level failures.
    async fn request_json(
        &self,
        method: Method,
        url: &str,
        body: &Value,
        write: bool,
    ) -> Result<Value> {
        let classify = |message: String| {
            if write {
                Error::IndexWrite(message)
            } else {
                Error::ServiceUnavailable(message)
            }
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            let resp = self
                .client
                .request(method.clone(), url)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| classify(format!("invalid vector-store response: {}", e)));
                    }

                    let text = response.text().await.unwrap_or_default();
                    let message = format!(
                        "vector store error {}: {}",
                        status,
                        text.chars().take(500).collect::<String>()
                    );
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(classify(message));
                        continue;
                    }
                    return Err(classify(message));
                }
                Err(e) => {
                    last_err = Some(Error::ServiceUnavailable(format!(
                        "vector store unreachable at {}: {}",
                        self.base_url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::ServiceUnavailable("vector store request failed".to_string())
        }))
    }
}

#[async_trait]
impl IndexStore for HttpIndex {
    async fn ensure_ready(&self, dims: usize) -> Result<()> {
        let resp = self
            .client
            .get(self.collection_url(""))
            .send()
            .await
            .map_err(|e| {
                Error::ServiceUnavailable(format!(
                    "vector store unreachable at {}: {}",
                    self.base_url, e
                ))
            })?;

        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status().as_u16() != 404 {
            return Err(Error::ServiceUnavailable(format!(
                "vector store error {} while checking collection '{}'",
                resp.status(),
                self.collection
            )));
        }

        let body = json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        self.request_json(Method::PUT, &self.collection_url(""), &body, true)
            .await?;
        Ok(())
    }

    async fn versions(&self, document_id: &str) -> Result<Vec<String>> {
        let mut versions: Vec<String> = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": {
                    "must": [ { "key": "document_id", "match": { "value": document_id } } ]
                },
                "limit": 128,
                "with_payload": ["content_version"],
                "with_vector": false,
            });
            if let Some(ref off) = offset {
                body["offset"] = off.clone();
            }

            let resp = self
                .request_json(
                    Method::POST,
                    &self.collection_url("/points/scroll"),
                    &body,
                    false,
                )
                .await?;

            let result = &resp["result"];
            for point in result["points"].as_array().into_iter().flatten() {
                if let Some(version) = point["payload"]["content_version"].as_str() {
                    if !versions.iter().any(|v| v == version) {
                        versions.push(version.to_string());
                    }
                }
            }

            match result.get("next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }

        versions.sort();
        Ok(versions)
    }

    async fn upsert_batch(&self, records: &[IndexRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.chunk_id,
                    "vector": r.embedding,
                    "payload": {
                        "document_id": r.document_id,
                        "content_version": r.content_version,
                        "chunk_index": r.chunk_index,
                        "source_text": r.source_text,
                    }
                })
            })
            .collect();

        self.request_json(
            Method::PUT,
            &self.collection_url("/points?wait=true"),
            &json!({ "points": points }),
            true,
        )
        .await?;
        Ok(())
    }

    async fn delete_version(&self, document_id: &str, content_version: &str) -> Result<()> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "document_id", "match": { "value": document_id } },
                    { "key": "content_version", "match": { "value": content_version } },
                ]
            }
        });

        self.request_json(
            Method::POST,
            &self.collection_url("/points/delete?wait=true"),
            &body,
            true,
        )
        .await?;
        Ok(())
    }

    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let body = json!({
            "vector": query_embedding,
            "limit": top_k,
            "with_payload": true,
        });

        let resp = self
            .request_json(
                Method::POST,
                &self.collection_url("/points/search"),
                &body,
                false,
            )
            .await?;

        parse_search_response(&resp)
    }
}

/// Parse a points-search response into ranked hits.
fn parse_search_response(resp: &Value) -> Result<Vec<SearchHit>> {
    let points = resp
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| {
            Error::ServiceUnavailable("invalid vector-store response: missing result".into())
        })?;

    let mut hits = Vec::with_capacity(points.len());
    for point in points {
        let payload = &point["payload"];
        hits.push(SearchHit {
            chunk: StoredChunk {
                chunk_id: point["id"].as_str().unwrap_or_default().to_string(),
                document_id: payload["document_id"].as_str().unwrap_or_default().to_string(),
                content_version: payload["content_version"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                chunk_index: payload["chunk_index"].as_u64().unwrap_or(0) as usize,
                source_text: payload["source_text"].as_str().unwrap_or_default().to_string(),
            },
            score: point["score"].as_f64().unwrap_or(0.0) as f32,
        });
    }

    rank_hits(&mut hits);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, score: f32) -> SearchHit {
        SearchHit {
            chunk: StoredChunk {
                chunk_id: chunk_id.to_string(),
                document_id: "doc".to_string(),
                content_version: "v1".to_string(),
                chunk_index: 0,
                source_text: String::new(),
            },
            score,
        }
    }

    #[test]
    fn test_rank_hits_score_descending() {
        let mut hits = vec![hit("a", 0.2), hit("b", 0.9), hit("c", 0.5)];
        rank_hits(&mut hits);
        let order: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_rank_hits_ties_break_on_chunk_id() {
        let mut hits = vec![hit("zz", 0.5), hit("aa", 0.5), hit("mm", 0.5)];
        rank_hits(&mut hits);
        let order: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn test_parse_search_response() {
        let resp = json!({
            "result": [
                {
                    "id": "id-low",
                    "score": 0.41,
                    "payload": {
                        "document_id": "acme.pdf",
                        "content_version": "etag-1",
                        "chunk_index": 2,
                        "source_text": "Total due: $87.12"
                    }
                },
                {
                    "id": "id-high",
                    "score": 0.93,
                    "payload": {
                        "document_id": "acme.pdf",
                        "content_version": "etag-1",
                        "chunk_index": 0,
                        "source_text": "Electricity usage"
                    }
                }
            ]
        });

        let hits = parse_search_response(&resp).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_id, "id-high");
        assert_eq!(hits[0].chunk.chunk_index, 0);
        assert!((hits[0].score - 0.93).abs() < 1e-6);
        assert_eq!(hits[1].chunk.source_text, "Total due: $87.12");
    }

    #[test]
    fn test_parse_search_response_rejects_missing_result() {
        assert!(parse_search_response(&json!({ "status": "ok" })).is_err());
    }
}
