//! Server-side progress storage.
//!
//! The server keeps every owner's rows in its own [`LocalStore`] file and
//! applies pushes with the same monotonic merge the devices use:
//! ```text
//! <DATA_DIR>/
//!   server.db
//! ```
//!
//! Pushes are serialised through one write lock; each row is additionally
//! merged inside its own SQL transaction.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::db::{self, ApplyReport, LocalStore, ProgressRepository, StoreError};
use crate::models::ProgressSlice;

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// Owner id is empty or contains a key separator.
    InvalidOwner(String),
    /// The underlying store failed.
    Storage(StoreError),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::InvalidOwner(id) => write!(f, "Invalid owner ID: {}", id),
            ServerStorageError::Storage(e) => write!(f, "Storage unavailable: {}", e),
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ServerStorageError {
    fn from(e: StoreError) -> Self {
        ServerStorageError::Storage(e)
    }
}

/// Result of merging one push.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The owner's full state after the merge.
    pub merged: ProgressSlice,
    pub report: ApplyReport,
}

/// Authoritative copy of every owner's progress.
#[derive(Clone)]
pub struct SyncServer {
    repo: ProgressRepository,
    lock: Arc<RwLock<()>>,
}

impl SyncServer {
    pub fn new(store: LocalStore) -> Self {
        Self {
            repo: ProgressRepository::new(store),
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// Opens (creating if needed) `server.db` under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, ServerStorageError> {
        let store = db::open_store(&data_dir.join("server.db"), None).await?;
        Ok(Self::new(store))
    }

    /// Validates an owner ID so it cannot collide with composite keys.
    fn validate_owner(owner: &str) -> Result<(), ServerStorageError> {
        if owner.trim().is_empty() || owner.contains('/') {
            return Err(ServerStorageError::InvalidOwner(owner.to_string()));
        }
        Ok(())
    }

    /// Merges a pushed slice into the owner's rows and returns the result.
    pub async fn merge(
        &self,
        owner: &str,
        incoming: &ProgressSlice,
    ) -> Result<MergeOutcome, ServerStorageError> {
        Self::validate_owner(owner)?;

        let _guard = self.lock.write().await;
        let report = self
            .repo
            .apply_slice(owner, incoming, &CancellationToken::new())
            .await?;
        let mut merged = self.repo.load_slice(owner).await?;
        merged.normalize();

        tracing::info!(
            "Merged {} row(s) for {} ({} rejected)",
            report.applied,
            owner,
            report.rejected.len()
        );

        Ok(MergeOutcome { merged, report })
    }

    /// The owner's current rows. Empty for an owner that never pushed.
    pub async fn load(&self, owner: &str) -> Result<ProgressSlice, ServerStorageError> {
        Self::validate_owner(owner)?;

        let _guard = self.lock.read().await;
        let mut slice = self.repo.load_slice(owner).await?;
        slice.normalize();
        Ok(slice)
    }
}
