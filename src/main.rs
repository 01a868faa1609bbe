//! # Folio CLI (`folio`)
//!
//! Runs the HTTP service and exposes each pipeline operation as a
//! subcommand against the same stores.
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio init` | Create the schema and the blob bucket |
//! | `folio serve` | Start the HTTP server |
//! | `folio register <user>` | Create a user (password from `--password` or `FOLIO_PASSWORD`) |
//! | `folio upload <path>` | Ingest a PDF |
//! | `folio list` | List documents |
//! | `folio get <id>` | Show a document and its sentences |
//! | `folio search <keyword>` | Case-insensitive sentence search |
//! | `folio page <id> <page>` | Render a page to a JPEG file |
//! | `folio delete <id>` | Delete a document |
//! | `folio reconcile` | Report orphan blobs and dangling rows |
//!
//! Logging goes through `tracing`; set `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use folio::app::App;
use folio::commands;
use folio::config;
use folio::server;

/// Folio: PDF ingestion, sentence search, and page rendering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Secrets are read from the environment.
#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio: PDF ingestion, sentence search, and page rendering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and the blob bucket. Safe to re-run.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Register a user.
    Register {
        username: String,

        /// Password; falls back to `FOLIO_PASSWORD`.
        #[arg(long, env = "FOLIO_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Ingest a PDF from disk.
    Upload {
        path: PathBuf,

        /// Stored file name (blob key). Defaults to the file's base name.
        #[arg(long)]
        name: Option<String>,
    },

    /// List all documents.
    List,

    /// Show a document and its sentences.
    Get { id: i64 },

    /// Search sentences for a keyword (case-insensitive substring).
    Search { keyword: String },

    /// Render one page (1-based) to a JPEG file.
    Page {
        id: i64,
        page: String,

        /// Output path. Defaults to `<id>-<page>.jpg`.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Delete a document, its blob, and its sentences.
    Delete { id: i64 },

    /// Compare blob keys with document rows and report disagreements.
    Reconcile,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        return server::run_server(&cfg).await;
    }

    let app = App::connect(&cfg).await?;

    match cli.command {
        Commands::Init => {
            println!(
                "Database schema and bucket '{}' are ready.",
                cfg.blob.bucket
            );
        }
        Commands::Serve => unreachable!(),
        Commands::Register { username, password } => {
            commands::run_register(&app, &username, &password).await?;
        }
        Commands::Upload { path, name } => {
            commands::run_upload(&app, &path, name.as_deref()).await?;
        }
        Commands::List => {
            commands::run_list(&app).await?;
        }
        Commands::Get { id } => {
            commands::run_get(&app, id).await?;
        }
        Commands::Search { keyword } => {
            commands::run_search(&app, &keyword).await?;
        }
        Commands::Page { id, page, output } => {
            commands::run_page(&app, id, &page, output).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(&app, id).await?;
        }
        Commands::Reconcile => {
            commands::run_reconcile(&app).await?;
        }
    }

    Ok(())
}
