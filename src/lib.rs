//! Offline content cache and progress synchronization.
//!
//! Content (surah text, verse audio, stories, static assets) is downloaded
//! into a local SQLite store by a resumable, rate-limited [`Downloader`].
//! Per-owner learning progress lives in the same store, is reconciled with a
//! sync server through a monotonic [`Merge`], and is protected by a
//! single-slot [`BackupManager`].

pub mod backup;
pub mod config;
pub mod db;
pub mod download;
pub mod engine;
pub mod merge;
pub mod models;
pub mod quran;
pub mod server;
pub mod sync;
pub mod validate;

pub use backup::{BackupError, BackupManager, BackupMeta, BackupSnapshot};
pub use config::{Config, ConfigError};
pub use db::{LocalStore, ProgressRepository, StoreError, StoreStats, Table};
pub use download::{DownloadError, DownloadOptions, DownloadReport, Downloader, JobSpec};
pub use engine::{Engine, EngineError};
pub use merge::Merge;
pub use server::SyncServer;
pub use sync::{SyncClient, SyncError, SyncReport};
