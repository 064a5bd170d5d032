//! askdb - connectivity probe and schema dump.
//!
//! Runs the startup/shutdown flow a host service performs around the pool:
//! initialize, verify liveness, reflect the schema once, print the
//! serialized document, close. Exits non-zero if the database is
//! unreachable or misconfigured.

use askdb::config::Settings;
use askdb::db::{DatabasePool, SchemaReflector};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if settings.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::parse();
    init_tracing(&settings);

    let config = settings.pool_config()?;
    info!(
        target = %config.redacted_dsn(),
        "starting askdb v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = DatabasePool::new(config)?;

    if let Err(e) = pool.initialize().await {
        error!(error = %e, "pool initialization failed");
        return Err(e.into());
    }
    pool.ping().await?;
    info!(stats = %pool.statistics(), "database reachable");

    let mut lease = pool.acquire().await?;
    let document = SchemaReflector::reflect(lease.connection()?).await?;
    lease.release().await?;
    info!(tables = document.len(), "schema reflected");

    println!("{}", serde_json::to_string_pretty(&document.to_json())?);

    pool.close().await?;
    Ok(())
}
