//! # Recon Harness CLI (`recon`)
//!
//! ## Usage
//!
//! ```bash
//! recon --config ./config/recon.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recon init` | Create the SQLite database and run schema migrations |
//! | `recon ingest <use_case> <file>` | Store, extract and index one file |
//! | `recon query <use_case> "<question>"` | Run a reconciliation query |
//! | `recon recons <use_case>` | List recent reconciliation records |
//! | `recon replay <use_case> <recon_id>` | Print a stored record |
//! | `recon snippet <use_case> <recon_id>` | Resolve a record's references |
//! | `recon prune` | Apply the configured retention |
//! | `recon serve` | Start the HTTP server |
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to change the
//! level (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use recon_harness::{config, ingest, migrate, recon, retention, server};

/// Recon Harness CLI: document ingestion and reconciliation over a managed
/// knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recon.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "recon",
    about = "Recon Harness: document ingestion and reconciliation over a managed knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recon.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest one file as a new batch.
    ///
    /// The file is stored, split into fragments by the extractor matching
    /// its extension, and a knowledge-base rebuild is triggered.
    Ingest {
        use_case: String,
        file: PathBuf,
        /// Knowledge base to rebuild (defaults to `[knowledge_base].kb_id`).
        #[arg(long)]
        kb_id: Option<String>,
        /// Name to store the file under (defaults to the file's name).
        #[arg(long)]
        filename: Option<String>,
        #[arg(long, default_value = "cli")]
        uploader: String,
        /// Return once the rebuild is triggered instead of waiting for it.
        #[arg(long)]
        no_wait: bool,
    },

    /// Ask a reconciliation question and record the answer.
    Query {
        use_case: String,
        query: String,
        #[arg(long)]
        kb_id: Option<String>,
        /// Restrict retrieval to fragments of one ingestion batch.
        #[arg(long)]
        batch_id: Option<String>,
        /// File holding the global prompt template.
        #[arg(long)]
        global_template: Option<PathBuf>,
        /// File holding the use-case prompt template.
        #[arg(long)]
        usecase_template: Option<PathBuf>,
    },

    /// List recent reconciliation records, newest first.
    Recons {
        use_case: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Print a stored reconciliation record as JSON.
    Replay { use_case: String, recon_id: String },

    /// Resolve the references of a stored record to source data.
    Snippet {
        use_case: String,
        recon_id: String,
        /// Only this reference (0-based).
        #[arg(long)]
        index: Option<usize>,
    },

    /// Delete records older than the `[retention]` limits.
    Prune,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            use_case,
            file,
            kb_id,
            filename,
            uploader,
            no_wait,
        } => {
            ingest::run_ingest(&cfg, &use_case, kb_id, &file, filename, &uploader, no_wait).await?;
        }
        Commands::Query {
            use_case,
            query,
            kb_id,
            batch_id,
            global_template,
            usecase_template,
        } => {
            recon::run_query(
                &cfg,
                &use_case,
                kb_id,
                &query,
                batch_id,
                global_template.as_deref(),
                usecase_template.as_deref(),
            )
            .await?;
        }
        Commands::Recons { use_case, limit } => {
            recon::run_list(&cfg, &use_case, limit).await?;
        }
        Commands::Replay { use_case, recon_id } => {
            recon::run_replay(&cfg, &use_case, &recon_id).await?;
        }
        Commands::Snippet {
            use_case,
            recon_id,
            index,
        } => {
            recon::run_snippet(&cfg, &use_case, &recon_id, index).await?;
        }
        Commands::Prune => {
            retention::run_prune(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
