//! # billscout
//!
//! A retrieval pipeline for utility-bill PDFs. Bills live in object storage;
//! billscout turns them into embedded, citable chunks in a vector store and
//! answers questions about them through a tool-calling chat agent that cites
//! its sources.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌────────────┐
//! │   Sources   │──▶│     Pipeline     │──▶│   Vector   │
//! │   S3 / FS   │   │ Extract+Chunk+   │   │   store    │
//! └─────────────┘   │      Embed       │   └─────┬──────┘
//!                   └──────────────────┘         │
//!                            ┌───────────────────┤
//!                            ▼                   ▼
//!                      ┌──────────┐       ┌──────────┐
//!                      │  search  │◀──────│  agent   │
//!                      │  (tool)  │       │  (chat)  │
//!                      └──────────┘       └──────────┘
//! ```
//!
//! Ingestion is incremental: every document carries an opaque content
//! version (ETag or content hash), and a document is only re-processed when
//! the version in the source no longer matches the version recorded in the
//! vector store. There is no separate ingestion ledger; the store itself is
//! the source of truth for what has been indexed.
//!
//! ## Quick Start
//!
//! ```bash
//! bills init                    # create the vector-store collection
//! bills ingest                  # index new and changed bills
//! bills search "march invoice"  # one-shot similarity search
//! bills chat                    # interactive Q&A with citations
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Document source abstraction |
//! | [`source_s3`] | S3 / MinIO source |
//! | [`source_fs`] | Local-directory source |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Deterministic text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector-store adapter |
//! | [`memory`] | In-memory index for tests |
//! | [`ingest`] | Incremental ingestion orchestration |
//! | [`retrieval`] | The `search_pdfs` tool |
//! | [`llm`] | Chat-model client |
//! | [`agent`] | Tool-calling turn loop |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod models;
pub mod retrieval;
pub mod source;
pub mod source_fs;
pub mod source_s3;
