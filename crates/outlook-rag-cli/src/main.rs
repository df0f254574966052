use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use outlook_rag_core::embeddings::create_embedder;
use outlook_rag_core::ingestion::{IngestionService, TextExtractor, create_splitter};
use outlook_rag_core::vectorstore::create_vectorstore;
use outlook_rag_core::{
    ChatService, ConfigLoader, GraphRegistry, Settings, TelemetryOptions, cli_span,
    init_telemetry,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;
use tracing::{Instrument, error, info};
use uuid::Uuid;

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "outlook-rag",
    version,
    about = "Chat with the J.P. Morgan 2025 outlook documents"
)]
struct Cli {
    /// Path to a TOML settings file (defaults to $OUTLOOK_RAG_CONFIG or ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Graph to run (defaults to the configured default graph).
    #[arg(short = 'g', long, global = true)]
    graph: Option<String>,

    /// Conversation thread for checkpointed graphs.
    #[arg(long, global = true)]
    thread: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat session.
    Chat,
    /// Ask a single question and stream the answer.
    Ask {
        /// The question to ask.
        question: String,
    },
    /// List registered graphs.
    List,
    /// Index the outlook documents into the vector store.
    Ingest {
        /// Directory to ingest (defaults to the configured PDF directory).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

enum ChatExit {
    Finished,
    Interrupted,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(ChatExit::Finished) => ExitCode::SUCCESS,
        Ok(ChatExit::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ChatExit> {
    let settings = ConfigLoader::load(cli.config.clone())?;
    init_telemetry(TelemetryOptions::from(&settings.logging))?;
    let settings = Arc::new(settings);

    let registry = GraphRegistry::with_defaults(settings.clone());
    let graph = cli
        .graph
        .clone()
        .unwrap_or_else(|| settings.graph.default_graph.clone());
    let session_id = Uuid::new_v4().to_string();

    let rt = Runtime::new()?;
    match cli.command {
        Command::List => {
            list_graphs(&registry, &settings);
            Ok(ChatExit::Finished)
        }
        Command::Ingest { dir } => {
            let span = cli_span("ingest", &graph, &session_id);
            rt.block_on(ingest(&settings, dir).instrument(span))?;
            Ok(ChatExit::Finished)
        }
        Command::Ask { question } => {
            let span = cli_span("ask", &graph, &session_id);
            rt.block_on(
                async {
                    let service =
                        ChatService::from_registry(&registry, &settings, Some(&graph)).await?;
                    stream_answer(&service, &question, cli.thread.as_deref()).await
                }
                .instrument(span),
            )?;
            Ok(ChatExit::Finished)
        }
        Command::Chat => {
            let span = cli_span("chat", &graph, &session_id);
            let _entered = span.enter();
            let service = rt.block_on(ChatService::from_registry(
                &registry,
                &settings,
                Some(&graph),
            ))?;
            let thread = cli.thread.unwrap_or_else(|| session_id.clone());
            chat_loop(&rt, &service, &thread)
        }
    }
}

fn list_graphs(registry: &GraphRegistry, settings: &Settings) {
    let graphs = registry.list_graphs();
    if graphs.is_empty() {
        println!("No graphs registered.");
        return;
    }
    println!("Available graphs:");
    for name in graphs {
        if name == settings.graph.default_graph {
            println!("  - {name} (default)");
        } else {
            println!("  - {name}");
        }
    }
}

fn chat_loop(rt: &Runtime, service: &ChatService, thread: &str) -> Result<ChatExit> {
    let mut editor = DefaultEditor::new().context("failed to initialise line editor")?;
    println!(
        "Chatting with {} (thread {thread}). Type 'quit' or 'exit' to leave.",
        service.graph_name()
    );

    loop {
        let line = match editor.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!();
                return Ok(ChatExit::Interrupted);
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                return Ok(ChatExit::Finished);
            }
            Err(err) => return Err(err).context("failed to read input"),
        };

        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message.to_ascii_lowercase().as_str(), "quit" | "exit") {
            println!("Goodbye!");
            return Ok(ChatExit::Finished);
        }
        // History is best effort.
        let _ = editor.add_history_entry(message);

        if let Err(err) = rt.block_on(stream_answer(service, message, Some(thread))) {
            error!(error = %format!("{err:#}"), "chat turn failed");
            eprintln!("\nError: {err:#}");
        }
    }
}

async fn stream_answer(service: &ChatService, message: &str, thread: Option<&str>) -> Result<()> {
    let mut tokens = service.stream_chat(message, thread).await?;

    println!("\nAssistant:");
    let mut stdout = io::stdout();
    while let Some(token) = tokens.next().await {
        let token = token?;
        stdout.write_all(token.as_bytes())?;
        stdout.flush()?;
    }
    println!("\n");
    Ok(())
}

async fn ingest(settings: &Settings, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| settings.paths.pdf_dir.clone());
    info!(dir = %dir.display(), "starting ingestion");

    let embedder = create_embedder(settings).await?;
    let store = create_vectorstore(settings, embedder).await?;
    let splitter = create_splitter(&settings.chunking)?;
    let service = IngestionService::new(Arc::new(TextExtractor::new()), store, splitter);

    let total = service
        .ingest_directory(&dir, &settings.catalog)
        .await
        .with_context(|| format!("failed to ingest {}", dir.display()))?;

    info!(chunks = total, "ingestion complete");
    println!("Ingested {total} chunks from {}", dir.display());
    Ok(())
}
