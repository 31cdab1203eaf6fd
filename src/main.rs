//! # docqa CLI
//!
//! Runs the retrieval engine against local text documents.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa chunk <file>` | Show the chunks and metadata produced for a document |
//! | `docqa classify "<question>"` | Show the detected intent and key terms |
//! | `docqa ask <file> "<question>"` | Ingest a document and print the ranked chunks |
//! | `docqa stats <file> "<q1>" "<q2>" ...` | Ask several questions, then print cache and router statistics |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use docqa_retrieval::chunk::ChunkingPipeline;
use docqa_retrieval::config::{load_config_or_default, Config};
use docqa_retrieval::intent::QueryIntentClassifier;
use docqa_retrieval::models::{metadata_str, CHUNK_TYPE, KEY_TERMS};
use docqa_retrieval::terms::KeyTermExtractor;
use docqa_retrieval::{RetrievalError, RetrievalOrchestrator, RetrievalOutcome};

const PREVIEW_CHARS: usize = 120;

/// docqa: adaptive, cached, hybrid retrieval over a single document.
#[derive(Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a text document and print the chunks.
    Chunk {
        file: PathBuf,

        /// Print chunks as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Classify a question and print its intent and key terms.
    Classify { question: String },

    /// Ingest a document and retrieve the chunks that answer a question.
    Ask {
        file: PathBuf,
        question: String,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask several questions about one document, then print statistics.
    Stats {
        file: PathBuf,
        #[arg(required = true)]
        questions: Vec<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_document(path: &Path) -> Result<(String, String)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let file_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("document")
        .to_string();
    Ok((file_id, text))
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

fn run_chunk(config: &Config, path: &Path, json: bool) -> Result<()> {
    let (file_id, text) = read_document(path)?;
    let chunks = ChunkingPipeline::from_config(&config.chunking).chunk_document(&file_id, &text);

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!("{} chunks for {}", chunks.len(), file_id);
    for chunk in &chunks {
        println!();
        println!(
            "[{}] chars {}..{} type={}",
            chunk.id,
            chunk.start_char,
            chunk.end_char,
            metadata_str(&chunk.metadata, CHUNK_TYPE).unwrap_or("-")
        );
        if let Some(terms) = metadata_str(&chunk.metadata, KEY_TERMS) {
            println!("    key_terms: {}", terms);
        }
        println!("    {}", preview(&chunk.text));
    }
    Ok(())
}

fn run_classify(question: &str) -> Result<()> {
    let metadata = QueryIntentClassifier::new().analyze(question);
    let terms = KeyTermExtractor::new().extract_named_terms(question);

    println!("intent:     {}", metadata.intent);
    println!("top_k:      {}", metadata.recommended_top_k);
    println!("confidence: {:.2}", metadata.confidence);
    println!("key_terms:  {}", terms.join(", "));
    if let Some(term) = &metadata.hints.term {
        println!("term:       {}", term);
    }
    println!("{}", metadata.explanation);
    Ok(())
}

fn print_outcome(outcome: &RetrievalOutcome) {
    println!(
        "intent={} strategy={} top_k={} cached_embedding={}",
        outcome.intent.intent, outcome.strategy, outcome.top_k, outcome.embedding_cached
    );
    for (rank, result) in outcome.results.iter().enumerate() {
        println!(
            "{:>2}. {} distance={:.4} type={}",
            rank + 1,
            result.id,
            result.distance,
            result.chunk_type().unwrap_or("-")
        );
        println!("    {}", preview(&result.text));
    }
}

/// Retrieve and print; "no relevant content" is reported, not raised.
async fn ask_one(
    orchestrator: &RetrievalOrchestrator,
    file_id: &str,
    question: &str,
    json: bool,
) -> Result<()> {
    match orchestrator.retrieve(file_id, question).await {
        Ok(outcome) if json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        Ok(outcome) => print_outcome(&outcome),
        Err(RetrievalError::EmptyResult { query }) => {
            println!("No relevant content found for: {}", query)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn run_ask(config: &Config, path: &Path, question: &str, json: bool) -> Result<()> {
    let (file_id, text) = read_document(path)?;
    let orchestrator = RetrievalOrchestrator::from_config(config)?;

    let report = orchestrator.ingestor().ingest(&file_id, &text).await?;
    tracing::info!(file_id = %report.file_id, chunks = report.chunks, "document ready");

    let result = ask_one(&orchestrator, &file_id, question, json).await;
    orchestrator.shutdown().await;
    result
}

async fn run_stats(config: &Config, path: &Path, questions: &[String]) -> Result<()> {
    let (file_id, text) = read_document(path)?;
    let orchestrator = RetrievalOrchestrator::from_config(config)?;
    orchestrator.ingestor().ingest(&file_id, &text).await?;

    for question in questions {
        println!("Q: {}", question);
        if let Err(e) = ask_one(&orchestrator, &file_id, question, false).await {
            println!("error: {:#}", e);
        }
        println!();
    }

    println!("{}", serde_json::to_string_pretty(&orchestrator.stats())?);
    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Chunk { file, json } => run_chunk(&config, &file, json)?,
        Commands::Classify { question } => run_classify(&question)?,
        Commands::Ask {
            file,
            question,
            json,
        } => run_ask(&config, &file, &question, json).await?,
        Commands::Stats { file, questions } => run_stats(&config, &file, &questions).await?,
    }

    Ok(())
}
