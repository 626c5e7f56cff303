//! # Aetherium CLI (`aetherium`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aetherium init` | Create the SQLite database and tables |
//! | `aetherium serve` | Start the HTTP API server |
//! | `aetherium task <task> "<text>"` | Run one router task and print the result |
//! | `aetherium memory query "<text>"` | Show the nearest stored passages |
//! | `aetherium tasks` | List the tasks the router accepts |
//!
//! ## Examples
//!
//! ```bash
//! aetherium init --config ./config/aetherium.toml
//! aetherium task improve "it was a dark and stormy night"
//! AETHERIUM_AUTH_SECRET=... aetherium serve
//! ```

use aetherium::{config, migrate, server, task_cmd};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Aetherium: an AI writing-assistant backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/aetherium.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "aetherium",
    about = "Aetherium: AI writing-assistant backend with long-term book memory",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/aetherium.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and the users, logs and memory tables.
    /// Safe to run repeatedly.
    Init,

    /// Start the HTTP API server.
    ///
    /// Binds to `[server].bind`. Stops on Ctrl-C or SIGTERM.
    Serve,

    /// Run one task through the router and print the response.
    Task {
        /// Task name, e.g. `improve` or `save_to_memory`. See `aetherium tasks`.
        task: String,

        /// Text to operate on.
        text: String,
    },

    /// Inspect long-term memory.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// List the tasks the router accepts.
    Tasks,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Print the stored passages nearest to the given text.
    Query {
        text: String,

        /// Number of passages to return (defaults to `[memory].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let load = || config::load_config(&cli.config);

    match &cli.command {
        Commands::Init => {
            migrate::run_migrations(&load()?).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&load()?).await?;
        }
        Commands::Task { task, text } => {
            task_cmd::run_task(&load()?, task, text).await?;
        }
        Commands::Memory {
            action: MemoryAction::Query { text, limit },
        } => {
            task_cmd::run_memory_query(&load()?, text, *limit).await?;
        }
        Commands::Tasks => task_cmd::list_tasks(),
    }

    Ok(())
}
