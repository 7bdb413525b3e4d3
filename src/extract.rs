//! PDF text extraction.
//!
//! Bill documents are PDFs; extraction returns plain UTF-8 text or an
//! [`Error::Extraction`] that the ingester treats as a per-document skip.

use crate::error::{Error, Result};

pub fn extract_text(document_id: &str, bytes: &[u8]) -> Result<String> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| Error::Extraction {
        document_id: document_id.to_string(),
        reason: e.to_string(),
    })?;

    // A parseable PDF with no text layer (e.g. a pure scan) is just as
    // unusable as a corrupt one.
    if text.trim().is_empty() {
        return Err(Error::Extraction {
            document_id: document_id.to_string(),
            reason: "no extractable text".to_string(),
        });
    }

    Ok(text)
}
