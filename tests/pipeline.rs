//! End-to-end pipeline tests over the library: filesystem source →
//! extraction → chunking → embedding → in-memory index → retrieval → agent.
//!
//! Uses hand-built minimal PDFs, the deterministic `hash` embedder, and a
//! scripted chat model, so everything runs offline.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use billscout::agent::{Agent, UNABLE_TO_ANSWER};
use billscout::chunk::ChunkParams;
use billscout::config::FsSourceConfig;
use billscout::embedding::HashEmbedder;
use billscout::error::Result;
use billscout::index::IndexStore;
use billscout::ingest::run_ingest;
use billscout::llm::{ChatMessage, ChatModel, ModelReply, ToolCallRequest, ToolSpec};
use billscout::memory::MemoryIndex;
use billscout::retrieval::RetrievalTool;
use billscout::source_fs::FsSource;

/// Minimal valid PDF containing `text` as its only content. Builds the
/// body, then the xref table with correct byte offsets, so pdf-extract can
/// parse it. `text` must not contain parentheses or backslashes.
fn minimal_pdf(text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn write_pdf(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), minimal_pdf(text)).unwrap();
}

fn source_for(root: &Path) -> FsSource {
    FsSource::new(FsSourceConfig {
        root: root.to_path_buf(),
        include_globs: vec!["**/*.pdf".to_string()],
        exclude_globs: vec![],
    })
    .unwrap()
}

fn params() -> ChunkParams {
    ChunkParams::new(1000, 200).unwrap()
}

const MARCH_TEXT: &str = "Electricity usage for March was 412 kWh and the total due is 87.12";
const WATER_TEXT: &str = "Water service charge for the first quarter was 30.00";

fn setup_bills() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_pdf(tmp.path(), "acme-march.pdf", MARCH_TEXT);
    write_pdf(tmp.path(), "waterco-q1.pdf", WATER_TEXT);
    tmp
}

#[test]
fn test_extracts_text_from_minimal_pdf() {
    let bytes = minimal_pdf("sample billing phrase");
    let text = billscout::extract::extract_text("test.pdf", &bytes).unwrap();
    assert!(text.contains("sample"));
    assert!(text.contains("phrase"));
}

#[tokio::test]
async fn test_ingest_then_reingest_is_idempotent() {
    let tmp = setup_bills();
    let source = source_for(tmp.path());
    let embedder = HashEmbedder::new(256);
    let store = MemoryIndex::new();

    let report = run_ingest(&source, &embedder, &store, params(), 64)
        .await
        .unwrap();
    assert_eq!(report.indexed.len(), 2);
    assert!(report.is_clean());
    assert!(store.len() >= 2);

    let writes_after_first = store.upsert_calls();

    // Unchanged source: zero additional writes.
    let report = run_ingest(&source, &embedder, &store, params(), 64)
        .await
        .unwrap();
    assert!(report.indexed.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(store.upsert_calls(), writes_after_first);
}

#[tokio::test]
async fn test_changed_content_is_reindexed_and_old_version_dropped() {
    let tmp = setup_bills();
    let source = source_for(tmp.path());
    let embedder = HashEmbedder::new(256);
    let store = MemoryIndex::new();

    run_ingest(&source, &embedder, &store, params(), 64)
        .await
        .unwrap();
    let old_version = store.versions("acme-march.pdf").await.unwrap().remove(0);

    write_pdf(
        tmp.path(),
        "acme-march.pdf",
        "Electricity usage for April was 388 kWh and the total due is 79.40",
    );

    let report = run_ingest(&source, &embedder, &store, params(), 64)
        .await
        .unwrap();
    assert!(report.indexed.contains(&"acme-march.pdf".to_string()));
    assert_eq!(report.skipped, vec!["waterco-q1.pdf".to_string()]);

    // Exactly one version remains, and it is not the old one.
    let versions = store.versions("acme-march.pdf").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_ne!(versions[0], old_version);

    // No search can surface the old version anymore.
    let tool = RetrievalTool::new(
        Arc::new(HashEmbedder::new(256)),
        Arc::new(store),
        10,
        -1.0,
    );
    let hits = tool.search_pdfs("electricity usage", None).await.unwrap();
    assert!(hits.iter().any(|h| h.document_id == "acme-march.pdf"));
    for hit in hits.iter().filter(|h| h.document_id == "acme-march.pdf") {
        assert!(hit.text.contains("April"));
    }
}

#[tokio::test]
async fn test_corrupt_document_does_not_abort_the_run() {
    let tmp = setup_bills();
    fs::write(tmp.path().join("garbage.pdf"), b"this is not a pdf").unwrap();

    let source = source_for(tmp.path());
    let embedder = HashEmbedder::new(256);
    let store = MemoryIndex::new();

    let report = run_ingest(&source, &embedder, &store, params(), 64)
        .await
        .unwrap();

    assert_eq!(report.indexed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "garbage.pdf");
    assert!(!report.is_clean());

    // The broken document stays un-indexed and is retried next run.
    let report = run_ingest(&source, &embedder, &store, params(), 64)
        .await
        .unwrap();
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn test_roundtrip_query_returns_its_own_chunk_first() {
    let tmp = setup_bills();
    let source = source_for(tmp.path());
    let embedder = Arc::new(HashEmbedder::new(256));
    let store = Arc::new(MemoryIndex::new());

    run_ingest(&source, embedder.as_ref(), store.as_ref(), params(), 64)
        .await
        .unwrap();

    let tool = RetrievalTool::new(embedder, store, 5, 0.0);
    let hits = tool.search_pdfs(MARCH_TEXT, None).await.unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].document_id, "acme-march.pdf");
    assert_eq!(hits[0].chunk_index, 0);
    assert_eq!(hits[0].citation_tag, "[acme-march.pdf#0]");
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

// ============ Agent over the ingested corpus ============

struct ScriptedModel {
    replies: Mutex<Vec<ModelReply>>,
}

impl ScriptedModel {
    fn new(mut replies: Vec<ModelReply>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelReply> {
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(ModelReply::Answer("out of script".to_string())))
    }
}

async fn ingested_tool() -> RetrievalTool {
    let tmp = setup_bills();
    let embedder = Arc::new(HashEmbedder::new(256));
    let store = Arc::new(MemoryIndex::new());
    run_ingest(
        &source_for(tmp.path()),
        embedder.as_ref(),
        store.as_ref(),
        params(),
        64,
    )
    .await
    .unwrap();
    RetrievalTool::new(embedder, store, 5, 0.0)
}

#[tokio::test]
async fn test_agent_answers_with_valid_citation() {
    let tool = ingested_tool().await;
    let model = Arc::new(ScriptedModel::new(vec![
        ModelReply::ToolCalls(vec![ToolCallRequest {
            id: "call_1".to_string(),
            name: "search_pdfs".to_string(),
            arguments: r#"{"query":"electricity usage for march"}"#.to_string(),
        }]),
        ModelReply::Answer("March usage was 412 kWh [acme-march.pdf#0].".to_string()),
    ]));
    let agent = Agent::new(model, tool, 3);

    let mut history = Vec::new();
    let turn = agent
        .run_turn(&mut history, "How much electricity in March?")
        .await
        .unwrap();

    assert!(turn.grounded);
    assert_eq!(turn.citations, vec!["[acme-march.pdf#0]".to_string()]);
}

#[tokio::test]
async fn test_agent_round_limit_yields_fixed_response() {
    let tool = ingested_tool().await;
    let request = |id: &str| ToolCallRequest {
        id: id.to_string(),
        name: "search_pdfs".to_string(),
        arguments: r#"{"query":"anything"}"#.to_string(),
    };
    let model = Arc::new(ScriptedModel::new(vec![
        ModelReply::ToolCalls(vec![request("c1")]),
        ModelReply::ToolCalls(vec![request("c2")]),
        ModelReply::ToolCalls(vec![request("c3")]),
        ModelReply::ToolCalls(vec![request("c4")]),
    ]));
    let agent = Agent::new(model, tool, 3);

    let mut history = Vec::new();
    let turn = agent.run_turn(&mut history, "loop").await.unwrap();
    assert_eq!(turn.answer, UNABLE_TO_ANSWER);
    assert!(turn.citations.is_empty());
}
