//! Multi-warehouse inventory ledger
//!
//! Tracks available, reserved, damaged, and in-transit stock per
//! (warehouse, variant) pair, records every quantity change as an
//! immutable stock movement, and raises stock alerts when thresholds are
//! crossed. Surrounding business systems (order processing, purchasing,
//! manual adjustments) call the seven operations on
//! [`services::StockService`]; correctness under concurrent writers is
//! delegated to serializable transactions in PostgreSQL.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{LedgerError, LedgerResult};

/// Initialize tracing with an env-filter default suitable for the ledger.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inventory_ledger=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load configuration, reading a `.env` file when present.
pub fn load_config() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Ok(Config::load()?)
}

/// Create the database connection pool.
pub async fn connect_pool(config: &config::DatabaseConfig) -> LedgerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.url)
        .await?;

    Ok(pool)
}

/// Run the ledger's schema migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
