mod progress_repo;
mod records;
mod store;

pub use progress_repo::{ApplyReport, ProgressRepository};
pub use records::{audio_key, child_key, story_key, surah_key};
pub use store::{LocalStore, Record, StoreError, StoreStats, Table, TableStats};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Opens (creating if needed) the store at `path`.
pub async fn open_store(path: &Path, quota_bytes: Option<u64>) -> Result<LocalStore, StoreError> {
    let pool = init_db(path).await?;
    tracing::debug!("Opened store at {}", path.display());
    Ok(LocalStore::new(pool).with_quota(quota_bytes))
}

#[cfg(test)]
pub(crate) async fn test_store() -> (LocalStore, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let store = open_store(&temp_dir.path().join("test.db"), None)
        .await
        .unwrap();
    (store, temp_dir)
}
