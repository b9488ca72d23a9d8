use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use itinerary_scheduler::config::SchedulerConfig;
use itinerary_scheduler::store::{JobStore, LibSqlJobStore};
use itinerary_scheduler::worker::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = SchedulerConfig::from_env();
    config.validate()?;

    let db_path =
        std::env::var("ITINERARY_DB_PATH").unwrap_or_else(|_| "./data/itinerary.db".to_string());

    eprintln!("🗺️  Itinerary scheduler v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Stop duration: {} ms", config.stop_duration.as_millis());
    eprintln!("   Database: {}", db_path);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn JobStore> = Arc::new(
        LibSqlJobStore::new_local(Path::new(&db_path))
            .await
            .with_context(|| format!("Failed to open database at {db_path}"))?,
    );

    let scheduler = Scheduler::new(&config, Arc::clone(&store));
    let pool = scheduler.pool();
    eprintln!(
        "   Pool: {} ({} slots, queue {})",
        pool.name(),
        pool.size(),
        pool.queue_capacity()
    );

    // ── Startup Recovery: requeue work interrupted by the last shutdown ──
    let resumed = scheduler.resume_unfinished().await?;
    if resumed > 0 {
        eprintln!("   Resumed {} unfinished itineraries", resumed);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!(
        in_flight = scheduler.pool().in_flight(),
        tracked = scheduler.tracked_count(),
        "Shutting down"
    );
    Ok(())
}
