use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use replayq::cli::args::{Cli, Commands};
use replayq::cli::commands;
use replayq::config::{Config, Paths};
use replayq::error::QueueError;
use replayq::sync::{HttpRemote, RemoteApply, Unreachable};
use replayq::{logging, SyncEngine};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        let code = e.downcast_ref::<QueueError>().map_or(1, QueueError::exit_code);
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    let format = cli.output;

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };

    let output = match cli.command {
        Commands::Sync => {
            let remote = Arc::new(HttpRemote::new(&config.remote, config.sync.apply_timeout())?);
            let engine = open_engine(&db_path, &config, remote).await?;
            commands::sync(&engine, format).await?
        },
        Commands::Watch => {
            let remote = Arc::new(HttpRemote::new(&config.remote, config.sync.apply_timeout())?);
            let engine = open_engine(&db_path, &config, remote.clone()).await?;
            commands::watch(&engine, &remote, config.remote.probe_interval(), format).await?
        },
        command => {
            let remote: Arc<dyn RemoteApply> = Arc::new(Unreachable);
            let engine = open_engine(&db_path, &config, remote).await?;
            match command {
                Commands::Enqueue {
                    entity_type,
                    operation,
                    payload,
                } => commands::enqueue(&engine, &entity_type, &operation, &payload, format).await?,
                Commands::Status { id } => commands::status(&engine, id.as_deref(), format).await?,
                Commands::Show { id } => commands::show(&engine, &id, format).await?,
                Commands::List { status, limit } => {
                    commands::list(&engine, status.as_deref(), limit, format).await?
                },
                Commands::Requeue { id, all } => {
                    commands::requeue(&engine, id.as_deref(), all, format).await?
                },
                Commands::Remove { id } => commands::remove(&engine, &id, format).await?,
                Commands::Prune { older_than } => {
                    commands::prune(&engine, older_than, format).await?
                },
                Commands::Sync | Commands::Watch => String::new(),
            }
        },
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

async fn open_engine(
    path: &std::path::Path,
    config: &Config,
    remote: Arc<dyn RemoteApply>,
) -> Result<SyncEngine> {
    SyncEngine::open(path, config, remote)
        .await
        .with_context(|| format!("Failed to open queue at {}", path.display()))
}

fn default_db_path() -> Result<PathBuf, QueueError> {
    let paths = Paths::new()?;
    paths.ensure_dirs()?;
    Ok(paths.database)
}
