//! # billscout CLI (`bills`)
//!
//! Commands for indexing utility-bill PDFs and asking questions about them.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bills init` | Create the vector-store collection |
//! | `bills ingest` | Index new and changed documents from the source |
//! | `bills search "<query>"` | One-shot similarity search |
//! | `bills chat` | Interactive Q&A with citations |
//!
//! ```bash
//! bills --config ./config/bills.toml ingest
//! bills search "how much was the march electricity bill"
//! bills chat
//! ```
//!
//! Credentials are read from the environment (a `.env` file is honored):
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` for S3 sources and
//! `OPENAI_API_KEY` when OpenAI endpoints are configured.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use billscout::agent::Agent;
use billscout::chunk::ChunkParams;
use billscout::config::{self, Config};
use billscout::embedding::{self, Embedder};
use billscout::index::{HttpIndex, IndexStore};
use billscout::ingest;
use billscout::llm::{ChatMessage, OpenAiChatModel};
use billscout::retrieval::RetrievalTool;
use billscout::source::DocumentSource;
use billscout::source_fs::FsSource;
use billscout::source_s3::S3Source;

/// billscout — ingest utility-bill PDFs and ask questions about them.
#[derive(Parser)]
#[command(
    name = "bills",
    about = "billscout — ingest utility-bill PDFs into a vector store and ask questions with cited answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bills.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector-store collection. Idempotent.
    Init,

    /// Ingest new and changed documents from the configured source.
    ///
    /// Documents whose content version already matches the index are
    /// skipped. Per-document failures are reported at the end; the exit
    /// code is nonzero if any document failed.
    Ingest,

    /// One-shot similarity search over the ingested chunks.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of passages to return.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Interactive question answering with citations. Type `exit` to quit.
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest => run_ingest(&config).await,
        Commands::Search { query, top_k } => run_search(&config, &query, top_k).await,
        Commands::Chat => run_chat(&config).await,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn build_source(config: &Config) -> Result<Box<dyn DocumentSource>> {
    if let Some(ref s3) = config.storage.s3 {
        return Ok(Box::new(S3Source::new(s3.clone())?));
    }
    if let Some(ref fs) = config.storage.filesystem {
        return Ok(Box::new(FsSource::new(fs.clone())?));
    }
    bail!("no storage source configured; set [storage.s3] or [storage.filesystem]")
}

fn build_tool(config: &Config) -> Result<RetrievalTool> {
    let embedder: Arc<dyn Embedder> = Arc::from(embedding::create_embedder(&config.embedding)?);
    let store: Arc<dyn IndexStore> = Arc::new(HttpIndex::new(&config.index)?);
    Ok(RetrievalTool::new(
        embedder,
        store,
        config.agent.top_k,
        config.agent.min_score,
    ))
}

async fn run_init(config: &Config) -> Result<()> {
    let store = HttpIndex::new(&config.index)?;
    store.ensure_ready(config.embedding.dims).await?;
    println!("collection '{}' ready", config.index.collection);
    Ok(())
}

async fn run_ingest(config: &Config) -> Result<()> {
    let source = build_source(config)?;
    let embedder = embedding::create_embedder(&config.embedding)?;
    let store = HttpIndex::new(&config.index)?;
    let params = ChunkParams::new(config.chunking.chunk_size, config.chunking.overlap)?;

    let report = ingest::run_ingest(
        source.as_ref(),
        embedder.as_ref(),
        &store,
        params,
        config.embedding.batch_size,
    )
    .await?;

    println!("ingest {}", source.describe());
    println!("  indexed: {}", report.indexed.len());
    println!("  up to date: {}", report.skipped.len());
    println!("  failed: {}", report.failed.len());
    for (document, reason) in &report.failed {
        println!("    {}: {}", document, reason);
    }

    if !report.is_clean() {
        bail!("{} document(s) failed to ingest", report.failed.len());
    }
    println!("ok");
    Ok(())
}

async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let tool = build_tool(config)?;
    let hits = tool.search_pdfs(query, top_k).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.score, hit.citation_tag);
        println!("    {}", excerpt(&hit.text, 240));
    }
    Ok(())
}

async fn run_chat(config: &Config) -> Result<()> {
    let tool = build_tool(config)?;
    let model = Arc::new(OpenAiChatModel::new(&config.model));
    let agent = Agent::new(model, tool, config.agent.max_tool_rounds);

    let mut history: Vec<ChatMessage> = Vec::new();
    let stdin = io::stdin();

    println!("billscout chat — ask about your bills. Type 'exit' to quit.\n");
    loop {
        print!("you> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        // Racing the turn against Ctrl-C drops the in-flight future; the
        // turn only commits history on completion, so a cancelled turn
        // leaves the conversation as it was.
        tokio::select! {
            result = agent.run_turn(&mut history, input) => match result {
                Ok(turn) => {
                    println!("\n{}\n", turn.answer);
                    if !turn.citations.is_empty() {
                        println!("sources: {}\n", turn.citations.join(" "));
                    }
                    if !turn.grounded {
                        println!("(warning: the answer cites passages that were not retrieved this turn)\n");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "turn failed");
                    println!("\nSorry, I could not complete that request: {}\n", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n(cancelled)\n");
            }
        }
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flattened = text.replace('\n', " ");
    let trimmed = flattened.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
