mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clawmem::{CreateOptions, ExternalSyncOptions, MemoryManager, ReadFileRequest, SearchOptions, StructuredWriteRequest};
use clawmem_core::{Config, StructuredType};

#[derive(Parser)]
#[command(name = "clawmem", about = "MongoDB-backed agent memory core", version)]
struct Cli {
  /// Project root whose `.claude/clawmem.toml` (if any) is loaded.
  #[arg(long, global = true, default_value = ".")]
  project: PathBuf,

  /// Identity under which memories are written and session-scoped searches run.
  #[arg(long, global = true, default_value = "default")]
  agent_id: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run (or join an in-flight) sync of the workspace into the store.
  Sync {
    #[arg(long)]
    force: bool,
  },
  /// Search memory and knowledge-base content.
  Search {
    query: String,
    #[arg(long, default_value_t = 10)]
    max_results: u64,
    #[arg(long, default_value_t = 0.1)]
    min_score: f32,
    #[arg(long)]
    session: Option<String>,
  },
  /// Print the manager's cached status.
  Status,
  /// Print aggregate store statistics.
  Stats,
  /// Read a markdown file under the workspace.
  Read {
    path: String,
    #[arg(long)]
    from: Option<usize>,
    #[arg(long)]
    lines: Option<usize>,
  },
  /// Write a structured-memory entry.
  Remember {
    #[arg(value_enum)]
    entry_type: CliStructuredType,
    key: String,
    value: String,
    #[arg(long)]
    context: Option<String>,
    #[arg(long, default_value_t = 1.0)]
    confidence: f32,
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
  },
  /// Check whether embeddings can currently be produced.
  ProbeEmbedding,
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum CliStructuredType {
  Decision,
  Preference,
  Person,
  Todo,
  Fact,
  Project,
  Architecture,
  Custom,
}

impl From<CliStructuredType> for StructuredType {
  fn from(value: CliStructuredType) -> Self {
    match value {
      CliStructuredType::Decision => StructuredType::Decision,
      CliStructuredType::Preference => StructuredType::Preference,
      CliStructuredType::Person => StructuredType::Person,
      CliStructuredType::Todo => StructuredType::Todo,
      CliStructuredType::Fact => StructuredType::Fact,
      CliStructuredType::Project => StructuredType::Project,
      CliStructuredType::Architecture => StructuredType::Architecture,
      CliStructuredType::Custom => StructuredType::Custom,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  logging::init_cli_logging();
  let cli = Cli::parse();

  let config = Config::load_for_project(&cli.project);
  let workspace = cli.project.clone();
  let manager = MemoryManager::create(CreateOptions {
    config,
    agent_id: cli.agent_id.clone(),
    workspace,
    extra_paths: Vec::new(),
  })
  .await
  .context("could not connect to the configured MongoDB deployment")?;

  let result = run(&manager, &cli.agent_id, cli.command).await;
  manager.close().await;
  result
}

async fn run(manager: &MemoryManager, agent_id: &str, command: Command) -> Result<()> {
  match command {
    Command::Sync { force } => {
      let report = manager
        .sync(ExternalSyncOptions { reason: Some("cli".to_string()), force, progress: None })
        .await?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Command::Search { query, max_results, min_score, session } => {
      let hits = manager
        .search(&query, SearchOptions { max_results, min_score, session_key: session })
        .await?;
      println!("{}", serde_json::to_string_pretty(&hits)?);
    }
    Command::Status => {
      println!("{}", serde_json::to_string_pretty(&manager.status())?);
    }
    Command::Stats => {
      let stats = manager.stats(None).await?;
      println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Command::Read { path, from, lines } => {
      let content = manager.read_file(ReadFileRequest { rel_path: path, from, lines }).await?;
      println!("{content}");
    }
    Command::Remember { entry_type, key, value, context, confidence, tags } => {
      manager
        .write_structured_memory(StructuredWriteRequest {
          agent_id: agent_id.to_string(),
          entry_type: entry_type.into(),
          key,
          value,
          context,
          confidence,
          tags,
          source: Some("cli".to_string()),
        })
        .await?;
    }
    Command::ProbeEmbedding => {
      manager.probe_embedding_availability().await?;
      println!("embedding availability: ok");
    }
  }
  Ok(())
}
