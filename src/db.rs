use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

/// Versioned schema, applied in order at startup so the column set is always
/// statically known afterwards.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create data dir {}", parent.display()))?;
    }

    let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        // Prevents transient "database is locked" errors under concurrent writes.
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        // SQLite permits a single writer; one connection sidesteps lock churn.
        .max_connections(1)
        .connect_with(opts)
        .await
        .with_context(|| format!("open sqlite database at {}", path.display()))?;

    Ok(pool)
}

#[cfg(test)]
pub async fn connect_memory() -> anyhow::Result<SqlitePool> {
    // In-memory databases exist per connection; the pool must stay at one.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true),
        )
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
