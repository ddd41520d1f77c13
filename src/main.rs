//! # Syncline Trigger Engine Entry Point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use triggers::{
    config::ConfigLoader,
    db,
    processor::TriggerProcessor,
    scheduler::TriggerScheduler,
    server::{AppState, run_server},
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "syncline-triggers", version, about = "Trigger polling and webhook delivery")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve HTTP and run the background scheduler until interrupted (default)
    Serve,
    /// Run one sweep over due triggers plus the retry pass, then exit
    Sweep,
    /// Run only the retry pass, then exit
    Retry,
    /// Delete delivered and failed events past the retention window
    Cleanup,
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Loaded configuration");
    }
    tracing::info!(profile = %config.profile, "Configuration loaded");

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let command = cli.command.unwrap_or(Command::Serve);
    if matches!(command, Command::Migrate) {
        return db::run_migrations(&db).await;
    }

    let processor =
        TriggerProcessor::new(db.clone(), &config).context("building trigger processor")?;

    match command {
        Command::Sweep => {
            let report = processor.run_sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Retry => {
            let report = processor.retry_due_events().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cleanup => {
            let deleted = processor.cleanup_events().await?;
            println!("deleted {deleted} events");
        }
        Command::Serve => serve(config, db, processor).await?,
        Command::Migrate => {}
    }

    Ok(())
}

async fn serve(
    config: triggers::config::AppConfig,
    db: sea_orm::DatabaseConnection,
    processor: TriggerProcessor,
) -> Result<()> {
    let config = Arc::new(config);
    let shutdown = CancellationToken::new();

    let scheduler = TriggerScheduler::new(processor.clone(), &config.scheduler);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    let state = AppState {
        config: Arc::clone(&config),
        db,
        processor,
    };
    let served = run_server(config, state, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(err) = scheduler_handle.await {
        tracing::error!(error = %err, "Scheduler task panicked");
    }

    served
}
