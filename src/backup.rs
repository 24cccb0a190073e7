//! Single-slot local backup of an owner's progress.
//!
//! The backup is one JSON file replaced wholesale on every snapshot:
//! ```json
//! {"version": 1, "createdAt": "...", "source": "local-device",
//!  "checksum": "<sha256 of data>", "data": {"progress": {...}, "letters": [...], ...}}
//! ```
//! Restoring merges the snapshot into the store, so an old backup can raise
//! counters and grow sets but never erase newer progress.

use chrono::{DateTime, Utc};
use serde::de::{self, Error as _, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::{ApplyReport, ProgressRepository, StoreError};
use crate::models::ProgressSlice;
use crate::validate;

pub const BACKUP_VERSION: u32 = 1;
pub const BACKUP_SOURCE: &str = "local-device";

/// How much of the file `meta()` reads looking for the header.
const HEADER_PREFIX_BYTES: u64 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),
    #[error("Backup I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Backup serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub source: String,
    /// SHA-256 (hex) of the serialized `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub data: ProgressSlice,
}

/// What `meta()` reports about the backup slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    pub exists: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub version: Option<u32>,
}

#[derive(Debug, Default)]
struct BackupHeader {
    version: Option<u32>,
    created_at: Option<DateTime<Utc>>,
}

/// Fills a [`BackupHeader`] from the leading keys of a snapshot and stops
/// at `data`, so a truncated prefix of the file is enough.
struct HeaderVisitor<'a>(&'a mut BackupHeader);

impl<'de> Visitor<'de> for HeaderVisitor<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a backup snapshot object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "version" => self.0.version = Some(map.next_value()?),
                "createdAt" => self.0.created_at = Some(map.next_value()?),
                "data" => return Err(A::Error::custom("end of header")),
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

fn read_header(prefix: &[u8]) -> BackupHeader {
    let mut header = BackupHeader::default();
    let mut deserializer = serde_json::Deserializer::from_slice(prefix);
    // Stopping at `data` surfaces as an error; fields read before it stand.
    let _ = de::Deserializer::deserialize_map(&mut deserializer, HeaderVisitor(&mut header));
    header
}

fn checksum(data: &ProgressSlice) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(data)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

#[derive(Clone)]
pub struct BackupManager {
    repo: ProgressRepository,
    owner: String,
    path: PathBuf,
}

impl BackupManager {
    pub fn new(repo: ProgressRepository, owner: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            owner: owner.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every progress row of the owner and replaces the backup slot.
    pub async fn snapshot(&self) -> Result<BackupSnapshot, BackupError> {
        let mut data = self.repo.load_slice(&self.owner).await?;
        data.normalize();

        let snapshot = BackupSnapshot {
            version: BACKUP_VERSION,
            created_at: Utc::now(),
            source: BACKUP_SOURCE.to_string(),
            checksum: Some(checksum(&data)?),
            data,
        };

        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write atomically using temp file + rename
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::info!(
            "Backed up {} row(s) to {}",
            snapshot.data.row_count(),
            self.path.display()
        );
        Ok(snapshot)
    }

    pub async fn meta(&self) -> Result<BackupMeta, BackupError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(BackupMeta {
                    exists: false,
                    created_at: None,
                    size_bytes: 0,
                    version: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut prefix = Vec::new();
        tokio::fs::File::open(&self.path)
            .await?
            .take(HEADER_PREFIX_BYTES)
            .read_to_end(&mut prefix)
            .await?;
        let header = read_header(&prefix);

        Ok(BackupMeta {
            exists: true,
            created_at: header.created_at,
            size_bytes: metadata.len(),
            version: header.version,
        })
    }

    /// Reads and fully validates the backup without touching the store.
    pub async fn load(&self) -> Result<BackupSnapshot, BackupError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::InvalidBackup(format!(
                    "no backup at {}",
                    self.path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let raw: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| BackupError::InvalidBackup(format!("not valid JSON: {}", e)))?;
        match raw.get("version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(BACKUP_VERSION) => {}
            Some(v) => {
                return Err(BackupError::InvalidBackup(format!(
                    "unsupported version {}",
                    v
                )))
            }
            None => return Err(BackupError::InvalidBackup("missing version".to_string())),
        }

        let snapshot: BackupSnapshot = serde_json::from_value(raw)
            .map_err(|e| BackupError::InvalidBackup(format!("malformed snapshot: {}", e)))?;

        if let Some(expected) = &snapshot.checksum {
            if *expected != checksum(&snapshot.data)? {
                return Err(BackupError::InvalidBackup("checksum mismatch".to_string()));
            }
        }

        if let Some(bad) = validate::slice(&snapshot.data, &self.owner).into_iter().next() {
            return Err(BackupError::InvalidBackup(format!(
                "{} row {}: {}",
                bad.table, bad.key, bad.reason
            )));
        }

        Ok(snapshot)
    }

    /// Merges the backup into the store: summary row first, then child rows.
    /// Nothing is applied unless every row of the backup is valid.
    pub async fn restore(&self) -> Result<ApplyReport, BackupError> {
        let snapshot = self.load().await?;
        let report = self
            .repo
            .apply_slice(&self.owner, &snapshot.data, &CancellationToken::new())
            .await?;

        tracing::info!(
            "Restored {} row(s) from backup taken {}",
            report.applied,
            snapshot.created_at
        );
        Ok(report)
    }

    /// Takes a snapshot every `every` until `cancel` fires. Failures are
    /// logged and the schedule continues.
    pub fn spawn_periodic(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.snapshot().await {
                            tracing::warn!("Scheduled backup failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Periodic backup stopped");
        })
    }
}
