//! Generic keyed record store on SQLite.
//!
//! Each logical table is a SQL table of the same shape (see `migrations/`).
//! Writes are per entity: a failed write never touches another table.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::merge::Merge;

/// SQLite result code for "database or disk is full".
const SQLITE_FULL: &str = "13";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Surahs,
    Audio,
    Stories,
    Assets,
    Progress,
    LetterProgress,
    SurahProgress,
    StoryProgress,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Surahs,
        Table::Audio,
        Table::Stories,
        Table::Assets,
        Table::Progress,
        Table::LetterProgress,
        Table::SurahProgress,
        Table::StoryProgress,
    ];

    /// SQL table name. Only ever one of the fixed names created by the
    /// migrations, so it is safe to splice into statements.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Surahs => "surahs",
            Table::Audio => "audio",
            Table::Stories => "stories",
            Table::Assets => "assets",
            Table::Progress => "progress",
            Table::LetterProgress => "letter_progress",
            Table::SurahProgress => "surah_progress",
            Table::StoryProgress => "story_progress",
        }
    }

    /// Content tables hold re-downloadable data and may be cleared.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Table::Surahs | Table::Audio | Table::Stories | Table::Assets
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.name() == s.to_lowercase())
            .ok_or_else(|| {
                let names: Vec<&str> = Table::ALL.iter().map(|t| t.name()).collect();
                format!("Invalid table '{}'. Valid options: {}", s, names.join(", "))
            })
    }
}

/// An entity that lives in one table under a semantic key.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    fn key(&self) -> String;

    /// Owning account, empty for shared content.
    fn owner(&self) -> &str {
        ""
    }

    /// Binary payload kept out of the JSON metadata.
    fn blob(&self) -> Option<&[u8]> {
        None
    }

    fn attach_blob(&mut self, _blob: Vec<u8>) {}
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage quota exceeded writing to {table}: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { table: Table, needed: u64, quota: u64 },
    #[error("Storage full writing to {table}: no room for {needed} more bytes")]
    StorageFull { table: Table, needed: u64 },
    #[error("Invalid {table} row {key}: {reason}")]
    Invalid {
        table: Table,
        key: String,
        reason: String,
    },
    #[error("Table {0} holds progress and cannot be cleared")]
    ProtectedTable(Table),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    fn from_write(table: Table, needed: u64, quota: Option<u64>, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(SQLITE_FULL) {
                return StoreError::full(table, needed, quota);
            }
        }
        StoreError::Database(err)
    }

    /// SQLite ran out of room. Blamed on the quota only when one is set.
    fn full(table: Table, needed: u64, quota: Option<u64>) -> Self {
        match quota {
            Some(quota) => StoreError::QuotaExceeded {
                table,
                needed,
                quota,
            },
            None => StoreError::StorageFull { table, needed },
        }
    }

    /// True for both quota and disk exhaustion.
    pub fn is_out_of_space(&self) -> bool {
        matches!(
            self,
            StoreError::QuotaExceeded { .. } | StoreError::StorageFull { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TableStats {
    pub table: Table,
    pub count: u64,
    pub approximate_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub tables: Vec<TableStats>,
}

impl StoreStats {
    pub fn get(&self, table: Table) -> Option<&TableStats> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn count(&self, table: Table) -> u64 {
        self.get(table).map(|t| t.count).unwrap_or(0)
    }

    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(|t| t.approximate_bytes).sum()
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    payload: String,
    data: Option<Vec<u8>>,
}

/// Durable keyed tables for cached content and progress.
///
/// Cloning is cheap; clones share the pool and the write lock.
#[derive(Clone, Debug)]
pub struct LocalStore {
    pool: SqlitePool,
    quota_bytes: Option<u64>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            quota_bytes: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch::<R>(&mut conn, key).await
    }

    /// Checks for a key without reading its payload.
    pub async fn contains(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE key = ?", table.name());
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Inserts or replaces a record under its key.
    pub async fn put<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        self.write(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Atomically merges `incoming` into the stored row with the same key,
    /// creating it when absent, and returns the stored result.
    pub async fn merge_record<R>(&self, incoming: &R) -> Result<R, StoreError>
    where
        R: Record + Merge + Clone,
    {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let merged = match fetch::<R>(&mut tx, &incoming.key()).await? {
            Some(existing) => existing.merged(incoming),
            None => incoming.clone(),
        };
        self.write(&mut tx, &merged).await?;
        tx.commit().await?;

        Ok(merged)
    }

    pub async fn scan_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let sql = format!("SELECT payload, data FROM {} ORDER BY key", R::TABLE.name());
        let rows: Vec<RecordRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(decode::<R>).collect()
    }

    pub async fn scan_owner<R: Record>(&self, owner: &str) -> Result<Vec<R>, StoreError> {
        let sql = format!(
            "SELECT payload, data FROM {} WHERE owner = ? ORDER BY key",
            R::TABLE.name()
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(decode::<R>).collect()
    }

    /// Deletes one cached content row. Progress rows are never deleted.
    pub async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        if !table.is_content() {
            return Err(StoreError::ProtectedTable(table));
        }
        let _guard = self.write_lock.lock().await;
        let sql = format!("DELETE FROM {} WHERE key = ?", table.name());
        let result = sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Empties a content table ("clear cache").
    pub async fn clear(&self, table: Table) -> Result<u64, StoreError> {
        if !table.is_content() {
            return Err(StoreError::ProtectedTable(table));
        }
        let _guard = self.write_lock.lock().await;
        let sql = format!("DELETE FROM {}", table.name());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        tracing::info!("Cleared {} row(s) from {}", result.rows_affected(), table);
        Ok(result.rows_affected())
    }

    /// Row counts and stored bytes per table, aggregated in SQL.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let mut tables = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let (count, bytes) = table_totals(&mut conn, table).await?;
            tables.push(TableStats {
                table,
                count: count as u64,
                approximate_bytes: bytes as u64,
            });
        }
        Ok(StoreStats { tables })
    }

    async fn write<R: Record>(
        &self,
        conn: &mut SqliteConnection,
        record: &R,
    ) -> Result<(), StoreError> {
        let key = record.key();
        let payload = serde_json::to_string(record)?;
        let blob = record.blob();
        let size = (payload.len() + blob.map(<[u8]>::len).unwrap_or(0)) as u64;

        if let Some(quota) = self.quota_bytes {
            let used = total_bytes(conn).await?;
            let replaced = existing_size(conn, R::TABLE, &key).await?;
            let needed = used.saturating_sub(replaced) + size;
            if needed > quota {
                tracing::warn!(
                    "Rejecting write of {} to {}: {} bytes needed, quota {}",
                    key,
                    R::TABLE,
                    needed,
                    quota
                );
                return Err(StoreError::QuotaExceeded {
                    table: R::TABLE,
                    needed,
                    quota,
                });
            }
        }

        let sql = format!(
            r#"
            INSERT INTO {} (key, owner, payload, data, size_bytes, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                owner = excluded.owner,
                payload = excluded.payload,
                data = excluded.data,
                size_bytes = excluded.size_bytes,
                updated_at = excluded.updated_at
            "#,
            R::TABLE.name()
        );
        sqlx::query(&sql)
            .bind(&key)
            .bind(record.owner())
            .bind(&payload)
            .bind(blob)
            .bind(size as i64)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::from_write(R::TABLE, size, self.quota_bytes, e))?;

        Ok(())
    }
}

async fn fetch<R: Record>(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<R>, StoreError> {
    let sql = format!("SELECT payload, data FROM {} WHERE key = ?", R::TABLE.name());
    let row: Option<RecordRow> = sqlx::query_as(&sql)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(decode::<R>).transpose()
}

fn decode<R: Record>(row: RecordRow) -> Result<R, StoreError> {
    let mut record: R = serde_json::from_str(&row.payload)?;
    if let Some(data) = row.data {
        record.attach_blob(data);
    }
    Ok(record)
}

async fn table_totals(conn: &mut SqliteConnection, table: Table) -> Result<(i64, i64), StoreError> {
    let sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM {}",
        table.name()
    );
    let totals: (i64, i64) = sqlx::query_as(&sql).fetch_one(&mut *conn).await?;
    Ok(totals)
}

async fn total_bytes(conn: &mut SqliteConnection) -> Result<u64, StoreError> {
    let mut total = 0u64;
    for table in Table::ALL {
        let (_, bytes) = table_totals(conn, table).await?;
        total += bytes as u64;
    }
    Ok(total)
}

async fn existing_size(
    conn: &mut SqliteConnection,
    table: Table,
    key: &str,
) -> Result<u64, StoreError> {
    let sql = format!("SELECT size_bytes FROM {} WHERE key = ?", table.name());
    let size: Option<(i64,)> = sqlx::query_as(&sql)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(size.map(|(s,)| s as u64).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::models::{CachedAudio, CachedSurah, LetterProgress, Progress};

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (store, _temp) = test_store().await;

        let surah = CachedSurah::new(1, "en.sahih");
        store.put(&surah).await.unwrap();

        let fetched: CachedSurah = store.get("1/en.sahih").await.unwrap().unwrap();
        assert_eq!(fetched.surah_number, 1);
        assert_eq!(fetched.translation_edition, "en.sahih");
        assert!(store.get::<CachedSurah>("2/en.sahih").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blob_stored_outside_payload() {
        let (store, _temp) = test_store().await;

        let audio = CachedAudio::new(1, 1, "ar.alafasy", vec![7u8; 2048]);
        store.put(&audio).await.unwrap();

        let fetched: CachedAudio = store.get("1/1/ar.alafasy").await.unwrap().unwrap();
        assert_eq!(fetched.bytes.len(), 2048);
        assert_eq!(fetched, audio);
    }

    #[tokio::test]
    async fn test_same_key_overwrites() {
        let (store, _temp) = test_store().await;

        store
            .put(&CachedAudio::new(1, 1, "ar.husary", vec![1]))
            .await
            .unwrap();
        store
            .put(&CachedAudio::new(1, 1, "ar.husary", vec![1, 2, 3]))
            .await
            .unwrap();

        let all: Vec<CachedAudio> = store.scan_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stats_counts_and_bytes() {
        let (store, _temp) = test_store().await;

        store
            .put(&CachedAudio::new(1, 1, "ar.alafasy", vec![0u8; 1000]))
            .await
            .unwrap();
        store
            .put(&CachedAudio::new(1, 2, "ar.alafasy", vec![0u8; 1000]))
            .await
            .unwrap();
        store.put(&Progress::new("parent-1")).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.count(Table::Audio), 2);
        assert_eq!(stats.count(Table::Progress), 1);
        assert_eq!(stats.count(Table::Surahs), 0);
        assert!(stats.get(Table::Audio).unwrap().approximate_bytes >= 2000);
        assert_eq!(stats.tables.len(), Table::ALL.len());
    }

    #[tokio::test]
    async fn test_quota_exceeded_leaves_store_intact() {
        let (store, _temp) = test_store().await;
        let store = store.with_quota(Some(4096));

        store
            .put(&CachedAudio::new(1, 1, "ar.alafasy", vec![0u8; 3000]))
            .await
            .unwrap();

        let result = store
            .put(&CachedAudio::new(1, 2, "ar.alafasy", vec![0u8; 3000]))
            .await;
        assert!(matches!(
            result,
            Err(StoreError::QuotaExceeded {
                table: Table::Audio,
                ..
            })
        ));

        // Earlier rows and other tables are untouched and still writable.
        assert!(store.contains(Table::Audio, "1/1/ar.alafasy").await.unwrap());
        assert!(!store.contains(Table::Audio, "1/2/ar.alafasy").await.unwrap());
        store.put(&Progress::new("parent-1")).await.unwrap();
    }

    #[test]
    fn test_full_disk_reports_configured_quota() {
        let err = StoreError::full(Table::Audio, 3000, Some(4096));
        assert!(matches!(
            err,
            StoreError::QuotaExceeded { quota: 4096, .. }
        ));
        assert!(err.to_string().contains("quota is 4096 bytes"));

        let err = StoreError::full(Table::Audio, 3000, None);
        assert!(matches!(err, StoreError::StorageFull { needed: 3000, .. }));
        assert!(!err.to_string().contains("quota"));
        assert!(err.is_out_of_space());
    }

    #[tokio::test]
    async fn test_quota_counts_replaced_row_once() {
        let (store, _temp) = test_store().await;
        let store = store.with_quota(Some(4096));

        let audio = CachedAudio::new(1, 1, "ar.alafasy", vec![0u8; 3000]);
        store.put(&audio).await.unwrap();
        // Re-downloading the same key replaces rather than adds.
        store.put(&audio).await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_record_creates_then_merges() {
        let (store, _temp) = test_store().await;

        let mut first = LetterProgress::new("parent-1", "alif");
        first.times_played = 5;
        store.merge_record(&first).await.unwrap();

        let mut second = LetterProgress::new("parent-1", "alif");
        second.times_played = 2;
        second.mastered = true;
        let merged = store.merge_record(&second).await.unwrap();

        assert_eq!(merged.times_played, 5);
        assert!(merged.mastered);
        let stored: LetterProgress = store.get("parent-1/alif").await.unwrap().unwrap();
        assert_eq!(stored, merged);
    }

    #[tokio::test]
    async fn test_scan_owner_filters() {
        let (store, _temp) = test_store().await;

        store
            .put(&LetterProgress::new("parent-1", "alif"))
            .await
            .unwrap();
        store
            .put(&LetterProgress::new("parent-2", "alif"))
            .await
            .unwrap();

        let rows: Vec<LetterProgress> = store.scan_owner("parent-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].parent_id, "parent-1");
    }

    #[tokio::test]
    async fn test_clear_refuses_progress_tables() {
        let (store, _temp) = test_store().await;

        store
            .put(&CachedAudio::new(1, 1, "ar.alafasy", vec![1]))
            .await
            .unwrap();
        assert_eq!(store.clear(Table::Audio).await.unwrap(), 1);
        assert!(matches!(
            store.clear(Table::Progress).await,
            Err(StoreError::ProtectedTable(Table::Progress))
        ));
        assert!(store.delete(Table::LetterProgress, "x").await.is_err());
    }

    #[test]
    fn test_table_from_str() {
        assert_eq!(Table::from_str("audio").unwrap(), Table::Audio);
        assert_eq!(Table::from_str("STORIES").unwrap(), Table::Stories);
        assert!(Table::from_str("videos").is_err());
    }
}
