mod command;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use command::{CommandOutput, CommandResponse, StoreAction, StoreOverrides};
use rag_vector_store::{EmbeddingMode, Metadata};
use serde_json::Value;
use std::io;
use std::path::PathBuf;

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "rag-store")]
#[command(about = "Embedding-indexed chunk store for retrieval-augmented generation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Print a JSON envelope instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding documents.json (overrides RAG_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Override embedding model id
    #[arg(long, global = true)]
    embed_model: Option<String>,

    /// Model directory (overrides RAG_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed and store the chunks of one document
    Add(AddArgs),

    /// Remove every chunk of a document
    Delete(GroupArgs),

    /// Rank stored chunks by similarity to a query
    Search(SearchArgs),

    /// Reassemble a stored document from its chunks
    Get(GroupArgs),

    /// List stored documents
    List,

    /// Show store size and embedding backend
    Status,

    /// Rewrite the snapshot from the loaded state
    Flush,
}

#[derive(Args)]
struct AddArgs {
    /// Document id; chunks already stored under it are replaced
    group_id: String,

    /// Source name recorded in metadata
    #[arg(long)]
    source: String,

    /// Extra metadata as key=value (value parsed as JSON when possible)
    #[arg(long = "meta", value_parser = command::parse_meta)]
    meta: Vec<(String, Value)>,

    /// JSON array of chunk strings, or '-' for stdin
    #[arg(long)]
    chunks_file: Option<PathBuf>,

    /// Chunk texts in order
    chunks: Vec<String>,
}

#[derive(Args)]
struct GroupArgs {
    /// Document id
    group_id: String,
}

#[derive(Args)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Maximum number of results (defaults to RAG_TOP_K)
    #[arg(long, short = 'k')]
    limit: Option<usize>,
}

#[derive(Copy, Clone, ValueEnum)]
enum EmbedMode {
    Model,
    Stub,
    Auto,
}

impl EmbedMode {
    const fn as_domain(self) -> EmbeddingMode {
        match self {
            EmbedMode::Model => EmbeddingMode::Model,
            EmbedMode::Stub => EmbeddingMode::Stub,
            EmbedMode::Auto => EmbeddingMode::Auto,
        }
    }
}

impl Commands {
    fn into_action(self) -> StoreAction {
        match self {
            Commands::Add(args) => StoreAction::Add {
                group_id: args.group_id,
                source: args.source,
                metadata: args.meta.into_iter().collect::<Metadata>(),
                chunks: args.chunks,
                chunks_file: args.chunks_file,
            },
            Commands::Delete(args) => StoreAction::Delete {
                group_id: args.group_id,
            },
            Commands::Search(args) => StoreAction::Search {
                query: args.query,
                limit: args.limit,
            },
            Commands::Get(args) => StoreAction::Get {
                group_id: args.group_id,
            },
            Commands::List => StoreAction::List,
            Commands::Status => StoreAction::Status,
            Commands::Flush => StoreAction::Flush,
        }
    }
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ORT logs every session build at info
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    let overrides = StoreOverrides {
        data_dir: cli.data_dir,
        embed_mode: cli.embed_mode.map(EmbedMode::as_domain),
        embed_model: cli.embed_model,
        model_dir: cli.model_dir,
    };
    let action = cli.command.into_action();

    // Model inference and snapshot writes are blocking.
    let result = tokio::task::spawn_blocking(move || {
        let config = overrides.resolve()?;
        command::execute(&config, action)
    })
    .await
    .context("Store task panicked")?;

    if cli.json {
        let response = match &result {
            Ok(output) => CommandResponse::from_output(output)?,
            Err(err) => CommandResponse::from_error(err),
        };
        print_stdout(&serde_json::to_string_pretty(&response)?)?;
        if response.is_error() {
            std::process::exit(1);
        }
        return Ok(());
    }

    match result {
        Ok(output) => render(&output),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn render(output: &CommandOutput) -> Result<()> {
    match output {
        CommandOutput::Hits { hits, .. } => {
            if hits.is_empty() {
                eprintln!("No results");
            }
            for (i, hit) in hits.iter().enumerate() {
                let source = hit
                    .metadata
                    .get(rag_vector_store::SOURCE_KEY)
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                print_stdout(&format!(
                    "{}. {} [{}] (similarity: {:.3})",
                    i + 1,
                    hit.id,
                    source,
                    hit.similarity
                ))?;
                print_stdout(&format!("   {}", hit.content))?;
                print_stdout("")?;
            }
        }
        CommandOutput::Document {
            content: Some(content),
            ..
        } => print_stdout(&content.full_content)?,
        CommandOutput::Groups(groups) => {
            if groups.is_empty() {
                eprintln!("No documents stored");
            }
            for group in groups {
                print_stdout(&format!(
                    "{}\t{}\t{} chunks",
                    group.id, group.name, group.chunk_count
                ))?;
            }
        }
        CommandOutput::Status(status) => {
            print_stdout(&output.message())?;
            print_stdout(&format!("Snapshot: {}", status.snapshot_path.display()))?;
            if status.degraded {
                eprintln!("Warning: hash embeddings in use; similarity is not semantic");
            }
        }
        CommandOutput::Document { content: None, .. } => eprintln!("{}", output.message()),
        CommandOutput::Added { .. } | CommandOutput::Deleted { .. } | CommandOutput::Flushed(_) => {
            print_stdout(&output.message())?
        }
    }
    Ok(())
}
