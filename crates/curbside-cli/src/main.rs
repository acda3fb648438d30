use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use curbside_store::PgStores;
use curbside_sync::{maybe_build_scheduler, orchestrator_from_env, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "curbside")]
#[command(about = "Curbside pickup scheduling and sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the reconciliation pipeline once and print the summary.
    Sync,
    /// Print what the next run would do, without writing anything.
    Preview,
    /// Apply pending database migrations.
    Migrate,
    /// Serve the admin API, with the cron scheduler when enabled.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = curbside_sync::run_sync_once_from_env().await?;
            println!(
                "sync {:?}: run_id={} detected={} assigned={} created={} skipped={} errored={} deleted={}",
                summary.status,
                summary.run_id,
                summary.detection_updates,
                summary.days_assigned,
                summary.orders_created,
                summary.orders_skipped,
                summary.orders_errored,
                summary.orders_deleted,
            );
            if let Some(error) = summary.error {
                eprintln!("first error: {error}");
            }
        }
        Commands::Preview => {
            let (orchestrator, _config) = orchestrator_from_env().await?;
            let preview = orchestrator.preview().await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let stores = PgStores::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            stores.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let config = SyncConfig::from_env();
            let (orchestrator, _config) = orchestrator_from_env().await?;
            let scheduler = maybe_build_scheduler(&config, orchestrator).await?;
            if let Some(scheduler) = scheduler {
                scheduler.start().await.context("starting scheduler")?;
                tracing::info!(cron = %config.sync_cron, "sync scheduler started");
            }
            curbside_web::serve_from_env().await?;
        }
    }

    Ok(())
}
