use playture::config::StoreConfig;
use playture::database::models::{JobFilters, OrderFilters};
use playture::database::repositories::{Repository, SqlxJobRepository, SqlxOrderRepository};
use playture::database::{Database, TxScope};
use playture::logging;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = StoreConfig::from_env()?;
    let (logging_config, _guard) = logging::init_logging(&config.log)?;
    if let Err(e) = logging_config.cleanup_old_logs().await {
        warn!(error = %e, "Failed to clean up old log files");
    }

    let db = Database::connect(&config.database).await?;
    db.migrate().await?;

    let jobs = SqlxJobRepository::new(db.pool().clone());
    let orders = SqlxOrderRepository::new(db.pool().clone());
    let job_count = jobs.count(&JobFilters::new(), TxScope::Autocommit).await?;
    let active_jobs = jobs.count(&JobFilters::active(), TxScope::Autocommit).await?;
    let order_count = orders.count(&OrderFilters::new(), TxScope::Autocommit).await?;

    info!(
        jobs = job_count,
        active_jobs,
        orders = order_count,
        behavior = %config.unit_of_work.behavior,
        "playture store ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    db.close().await;
    Ok(())
}
