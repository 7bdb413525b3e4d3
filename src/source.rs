//! Document source abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::DocumentRef;

/// A place bill documents live.
///
/// Listing is cheap: it returns stable document ids paired with opaque
/// content-version tokens, without fetching any bytes. The token must
/// change if and only if the document's bytes change (content-addressed),
/// because the ingester keys all re-indexing decisions on it. Content is
/// fetched per document on demand.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Human-readable label for logs and reports,
    /// e.g. `s3://bills/2024/` or `file:///var/bills`.
    fn describe(&self) -> String;

    async fn list_documents(&self) -> Result<Vec<DocumentRef>>;

    async fn get_content(&self, document_id: &str) -> Result<Vec<u8>>;
}
