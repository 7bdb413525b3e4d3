//! Error taxonomy shared across the pipeline.
//!
//! Each variant maps to a distinct handling policy: configuration problems
//! are fatal at startup, extraction problems skip a single document,
//! transient service problems are retried inside the clients before they
//! surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// A document's bytes could not be turned into text. The ingester
    /// records the failure and continues with the rest of the batch.
    #[error("extraction failed for '{document_id}': {reason}")]
    Extraction { document_id: String, reason: String },

    /// An embedding call failed. The whole batch fails atomically, so the
    /// caller can retry without partial writes.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A vector-store write failed. Upserts are keyed by chunk id, so
    /// retrying the batch is safe.
    #[error("index write failed: {0}")]
    IndexWrite(String),

    /// A model-issued tool call had an unknown name or malformed
    /// arguments. Rendered back to the model as a tool result; never
    /// raised to the user.
    #[error("invalid tool call: {0}")]
    ToolArgument(String),

    /// A remote endpoint stayed unreachable after retries.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
