use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use uptime_engine::checkers::CheckerRegistry;
use uptime_engine::config::Config;
use uptime_engine::database::{self, Database, DatabaseImpl};
use uptime_engine::maintenance::StoredMaintenance;
use uptime_engine::monitoring::{MonitorScheduler, RetentionCleanup, SchedulerOptions};
use uptime_engine::notification::LogNotifier;
use uptime_engine::pool;

#[derive(Parser, Debug)]
#[command(version, about = "Monitor scheduling and check execution engine")]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Schedule every active monitor until interrupted
    #[default]
    Run,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let args = Args::parse();

    let config = Config::from_config(args.config.as_ref())?;

    match args.command.unwrap_or_default() {
        Command::Config => {
            println!("{config}");
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!(path = %config.database.path.display(), "Opening database");
    let pool = pool::open_pool(&config.database.path, config.database.pool_size).await?;
    {
        let conn = pool.get().await.map_err(|e| anyhow!("failed to get database connection: {e}"))?;
        database::initialize_database(&conn).await?;
    }
    let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));

    let registry = Arc::new(CheckerRegistry::with_defaults(&config.checkers)?);
    info!(types = ?registry.types(), "Checkers registered");

    let scheduler = MonitorScheduler::builder(database.clone(), registry)
        .maintenance(Arc::new(StoredMaintenance::new(database.clone())))
        .notifier(Arc::new(LogNotifier))
        .options(SchedulerOptions::from(&config.scheduler))
        .build();

    let cleanup = RetentionCleanup::new(database, config.retention.policy())
        .start_periodic_cleanup(scheduler.shutdown_token().child_token());

    scheduler.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested");

    scheduler.stop().await;
    if let Err(e) = cleanup.await {
        error!(error = %e, "Retention task failed");
    }
    Ok(())
}
