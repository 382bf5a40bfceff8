//! Database module
//!
//! Pool construction and embedded migrations. Entity queries live in `queries`.

pub mod queries;

use std::time::Duration;

use anyhow::Result;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run the embedded migrations, after reconciling checksums of already
/// applied versions (line-ending changes must not block startup)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    reconcile_checksums(pool, &MIGRATOR).await?;
    MIGRATOR.run(pool).await?;

    Ok(())
}

async fn reconcile_checksums(pool: &PgPool, migrator: &Migrator) -> Result<()> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(());
    }

    let applied: Vec<(i64, Vec<u8>)> = sqlx::query_as("SELECT version, checksum FROM _sqlx_migrations")
        .fetch_all(pool)
        .await?;

    for (version, stored) in applied {
        let Some(migration) = migrator
            .iter()
            .find(|m| m.version == version && !m.migration_type.is_down_migration())
        else {
            warn!("Applied migration {} is not part of this build", version);
            continue;
        };

        if stored.as_slice() != migration.checksum.as_ref() {
            warn!("Migration {} ({}) checksum changed, updating", version, migration.description);
            sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                .bind(migration.checksum.as_ref())
                .bind(version)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
