//! Command-line interface for the service binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;
use crate::engine::Engine;
use crate::server::{self, AppState};
use crate::store::Store;

/// Check argv for the verbose flag before clap runs, so logging can be
/// initialized first.
pub fn is_verbose() -> bool {
    std::env::args().any(|a| a == "-v" || a == "--verbose")
}

#[derive(Parser)]
#[command(name = "docmill", about = "Asynchronous document-to-Markdown conversion service", version)]
struct Cli {
    /// Path to a config file (TOML, YAML, or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the conversion engine and the submission API
    Serve {
        /// Override the worker pool size
        #[arg(long)]
        workers: Option<usize>,
        /// Override the bind address
        #[arg(long)]
        bind: Option<String>,
    },
    /// Apply schema migrations and exit
    Migrate,
    /// Print queue and document counts
    Status,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref()).await;

    match cli.command {
        Command::Serve { workers, bind } => {
            if let Some(workers) = workers {
                settings.worker_count = workers.max(1);
            }
            if let Some(bind) = bind {
                settings.bind_addr = bind;
            }

            let mut engine = Engine::init(settings)?;
            engine.start().await;

            let ctx = engine.context();
            let state = AppState::new(ctx.settings.clone(), ctx.store.clone(), ctx.blobs.clone());
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
            };
            server::serve(state, shutdown).await?;

            engine.stop().await;
            Ok(())
        }
        Command::Migrate => {
            settings.ensure_directories()?;
            let store = Store::open(&settings.store_options())?;
            println!("database ready at {}", store.path().display());
            Ok(())
        }
        Command::Status => {
            let store = Store::open(&settings.store_options())?;
            println!("documents:");
            for (status, count) in store.documents().count_by_status()? {
                println!("  {:<12} {}", status, count);
            }
            println!("jobs:");
            for (status, count) in store.queue().count_by_status()? {
                println!("  {:<12} {}", status, count);
            }
            Ok(())
        }
    }
}
