//! # finrag CLI
//!
//! ```bash
//! finrag --config ./config/finrag.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finrag init` | Create the SQLite database and run schema migrations |
//! | `finrag ingest` | Extract, chunk and index the documents root |
//! | `finrag search "<query>"` | Search indexed documents |
//! | `finrag get <id>` | Retrieve a full document by UUID |
//! | `finrag embed pending` | Backfill missing or stale embeddings |
//! | `finrag embed rebuild` | Delete and regenerate all embeddings |
//! | `finrag stats` | Index size and embedding coverage |
//! | `finrag export` | Dump documents and chunks as JSON |
//! | `finrag tool list` | List the agent tools |
//! | `finrag tool call <name>` | Run one tool with JSON parameters |
//! | `finrag ask "<question>"` | Answer a question with the agent |
//! | `finrag serve` | Start the HTTP server |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use finrag::agent::Orchestrator;
use finrag::config;
use finrag::export::DEFAULT_EXPORT_PATH;
use finrag::ingest::IngestOptions;
use finrag::llm::OpenAiCompatClient;
use finrag::progress::ProgressMode;
use finrag::search::SearchOptions;
use finrag::tools::{ToolContext, ToolRegistry};
use finrag::{embed_cmd, export, get, ingest, logging, migrate, search, server, stats};

/// finrag: retrieval-augmented answers over your financial documents.
///
/// API keys (`GROQ_API_KEY`, `SERPER_API_KEY`, `ALPHAVANTAGE_API_KEY`) are
/// read from the environment or a `.env` file in the working directory.
#[derive(Parser)]
#[command(name = "finrag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/finrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest the configured documents root.
    ///
    /// Files are extracted, chunked, embedded when a provider is configured,
    /// and stored in SQLite. Runs are incremental via a modification-time
    /// checkpoint.
    Ingest {
        /// Ignore the checkpoint and re-ingest every file.
        #[arg(long)]
        full: bool,

        /// Show item and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Only files modified on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only files modified on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr: auto, human, json, or off.
        #[arg(long, default_value = "auto")]
        progress: ProgressMode,
    },

    /// Search indexed documents.
    Search {
        query: String,

        /// `keyword` (FTS5), `semantic` (vector), or `hybrid` (fused).
        #[arg(long, default_value = "keyword")]
        mode: String,

        #[arg(long)]
        source: Option<String>,

        /// Only documents updated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        limit: Option<i64>,

        /// Print the scoring breakdown for each result.
        #[arg(long)]
        explain: bool,
    },

    /// Retrieve a document by its UUID.
    Get { id: String },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Document, chunk and embedding counts.
    Stats,

    /// Export documents and chunks as JSON.
    Export {
        /// Output file, or `-` for stdout.
        #[arg(long, short, default_value = DEFAULT_EXPORT_PATH)]
        output: PathBuf,
    },

    /// Inspect and run agent tools.
    Tool {
        #[command(subcommand)]
        action: ToolAction,
    },

    /// Answer a question with the agent.
    Ask { question: String },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = "auto")]
        progress: ProgressMode,
    },

    /// Delete and regenerate all embeddings.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, default_value = "auto")]
        progress: ProgressMode,
    },
}

#[derive(Subcommand)]
enum ToolAction {
    /// List the built-in tools and their parameters.
    List,
    /// Call a tool and print its JSON result.
    Call {
        name: String,
        /// Parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        json: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let cli = Cli::parse();

    // Listing tools works without a config file.
    if let Commands::Tool {
        action: ToolAction::List,
    } = &cli.command
    {
        list_tools();
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            full,
            dry_run,
            since,
            until,
            limit,
            progress,
        } => {
            let opts = IngestOptions {
                full,
                dry_run,
                since,
                until,
                limit,
            };
            ingest::run_ingest(&cfg, &opts, progress.reporter().as_ref()).await?;
        }
        Commands::Search {
            query,
            mode,
            source,
            since,
            limit,
            explain,
        } => {
            let opts = SearchOptions {
                mode: &mode,
                source: source.as_deref(),
                since: since.as_deref(),
                limit,
                explain,
                ..Default::default()
            };
            search::run_search(&cfg, &query, &opts).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
                progress,
            } => {
                embed_cmd::run_embed_pending(
                    &cfg,
                    limit,
                    batch_size,
                    dry_run,
                    progress.reporter().as_ref(),
                )
                .await?;
            }
            EmbedAction::Rebuild {
                batch_size,
                progress,
            } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size, progress.reporter().as_ref())
                    .await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, &output).await?;
        }
        Commands::Tool { action } => match action {
            ToolAction::List => list_tools(),
            ToolAction::Call { name, json } => {
                let params: serde_json::Value =
                    serde_json::from_str(&json).context("--json must be a JSON object")?;
                let ctx = ToolContext::new(Arc::new(cfg));
                let result = ToolRegistry::with_builtins()
                    .call(&name, params, &ctx)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        },
        Commands::Ask { question } => {
            let model = OpenAiCompatClient::from_config(&cfg.llm)?;
            let agent = Orchestrator::new(Arc::new(cfg), Arc::new(model));
            let outcome = agent.ask(&question).await?;
            tracing::info!(steps = outcome.steps, "agent finished");
            println!("{}", outcome.answer);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn list_tools() {
    let registry = ToolRegistry::with_builtins();
    println!("{} tools:", registry.len());
    for info in registry.infos() {
        let required = info
            .parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| {
                r.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        println!("  {:<18} ({})  {}", info.name, required, info.description);
    }
}
