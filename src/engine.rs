//! Per-process context tying the components together.
//!
//! One `Engine` is built at startup and handed to whatever drives the jobs.
//! It allows a single job at a time: a second caller gets
//! [`EngineError::Busy`] instead of running concurrently against the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backup::{BackupError, BackupManager, BackupMeta, BackupSnapshot};
use crate::config::{Config, ConfigError};
use crate::db::{self, ApplyReport, LocalStore, ProgressRepository, StoreError, StoreStats, Table};
use crate::download::{
    DownloadError, DownloadOptions, DownloadProgress, DownloadReport, Downloader, JobSpec, Sources,
};
use crate::sync::{SyncClient, SyncError, SyncReport};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Another job is already running: {0}")]
    Busy(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Held while a job runs; releases the engine on drop.
pub struct JobGuard {
    flag: Arc<AtomicBool>,
    current: Arc<Mutex<Option<String>>>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Engine {
    config: Config,
    repo: ProgressRepository,
    sources: Sources,
    in_flight: Arc<AtomicBool>,
    current: Arc<Mutex<Option<String>>>,
}

impl Engine {
    pub fn new(config: Config, store: LocalStore, sources: Sources) -> Self {
        Self {
            config,
            repo: ProgressRepository::new(store),
            sources,
            in_flight: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the configured store and builds the HTTP collaborators.
    pub async fn open(config: Config) -> Result<Self, EngineError> {
        let store = db::open_store(&config.database_path(), config.quota_bytes.value).await?;
        let sources = Sources::http(
            &config.download.sources,
            Duration::from_secs(config.download.item_timeout_secs),
        )?;
        Ok(Self::new(config, store, sources))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        self.repo.store()
    }

    pub fn progress(&self) -> &ProgressRepository {
        &self.repo
    }

    /// Claims the engine for one job.
    pub fn begin(&self, job: &str) -> Result<JobGuard, EngineError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let running = self
                .current
                .lock()
                .ok()
                .and_then(|c| c.clone())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(EngineError::Busy(running));
        }

        if let Ok(mut current) = self.current.lock() {
            *current = Some(job.to_string());
        }
        tracing::debug!("Starting job {}", job);

        Ok(JobGuard {
            flag: self.in_flight.clone(),
            current: self.current.clone(),
        })
    }

    pub fn owner(&self) -> Result<&str, EngineError> {
        self.config
            .parent_id
            .value
            .as_deref()
            .ok_or(EngineError::Config(ConfigError::MissingParentId))
    }

    pub fn backup_manager(&self) -> Result<BackupManager, EngineError> {
        Ok(BackupManager::new(
            self.repo.clone(),
            self.owner()?,
            self.config.backup_path(),
        ))
    }

    /// Runs a download job. When a backup interval is configured and an owner
    /// is known, progress is also backed up on that schedule while it runs.
    pub async fn download(
        &self,
        job: &JobSpec,
        options: DownloadOptions,
        on_progress: &mut (dyn FnMut(&DownloadProgress) + Send),
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, EngineError> {
        let _guard = self.begin("download")?;

        let periodic = match (self.config.backup.interval_minutes, self.backup_manager()) {
            (Some(minutes), Ok(manager)) if minutes > 0 => {
                let stop = cancel.child_token();
                let handle = manager.spawn_periodic(Duration::from_secs(minutes * 60), stop.clone());
                Some((stop, handle))
            }
            _ => None,
        };

        let downloader = Downloader::new(self.store().clone(), self.sources.clone(), options);
        let result = downloader.run(job, on_progress, cancel).await;

        if let Some((stop, handle)) = periodic {
            stop_periodic(stop, handle).await;
        }

        Ok(result?)
    }

    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, EngineError> {
        let _guard = self.begin("sync")?;
        let client = SyncClient::from_config(&self.config.sync)?;
        let owner = self.owner()?;
        Ok(client.sync(&self.repo, owner, cancel).await?)
    }

    pub async fn backup(&self) -> Result<BackupSnapshot, EngineError> {
        let _guard = self.begin("backup")?;
        Ok(self.backup_manager()?.snapshot().await?)
    }

    pub async fn backup_meta(&self) -> Result<BackupMeta, EngineError> {
        Ok(self.backup_manager()?.meta().await?)
    }

    pub async fn restore(&self) -> Result<ApplyReport, EngineError> {
        let _guard = self.begin("restore")?;
        Ok(self.backup_manager()?.restore().await?)
    }

    pub async fn stats(&self) -> Result<StoreStats, EngineError> {
        let _guard = self.begin("stats")?;
        Ok(self.store().stats().await?)
    }

    /// Empties the given content tables. Returns the number of rows removed.
    pub async fn clear_cache(&self, tables: &[Table]) -> Result<u64, EngineError> {
        let _guard = self.begin("clear-cache")?;
        let mut removed = 0;
        for table in tables {
            removed += self.store().clear(*table).await?;
        }
        Ok(removed)
    }
}

/// Stops a periodic backup task and waits for it. A panic inside the task
/// is logged; the job that ran alongside it has already finished.
async fn stop_periodic(stop: CancellationToken, handle: JoinHandle<()>) {
    stop.cancel();
    if let Err(e) = handle.await {
        tracing::warn!("Periodic backup task failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::download::testing::{fake_sources, fast_options, FakeQuran};
    use crate::models::CachedSurah;

    async fn setup_engine(parent_id: Option<&str>) -> (Engine, tempfile::TempDir) {
        let (store, temp) = test_store().await;
        let mut config = Config::load(Some(temp.path().join("none.yaml"))).unwrap();
        config.data_dir.value = temp.path().to_path_buf();
        config.parent_id.value = parent_id.map(str::to_string);
        config.sync = Default::default();
        config.backup = Default::default();
        let sources = fake_sources(Arc::new(FakeQuran::default()), true);
        (Engine::new(config, store, sources), temp)
    }

    #[tokio::test]
    async fn test_second_job_is_busy() {
        let (engine, _temp) = setup_engine(Some("family-1")).await;

        let guard = engine.begin("download").unwrap();
        match engine.stats().await {
            Err(EngineError::Busy(running)) => assert_eq!(running, "download"),
            other => panic!("expected Busy, got {:?}", other.map(|_| ())),
        }
        assert!(matches!(engine.backup().await, Err(EngineError::Busy(_))));

        drop(guard);
        assert!(engine.stats().await.is_ok());
    }

    #[tokio::test]
    async fn test_download_through_engine() {
        let (engine, _temp) = setup_engine(Some("family-1")).await;
        let job = JobSpec::Surahs {
            edition: "en.sahih".to_string(),
            surahs: vec![1, 2, 3],
        };

        let report = engine
            .download(&job, fast_options(), &mut |_| {}, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.downloaded, 3);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.count(Table::Surahs), 3);

        assert_eq!(engine.clear_cache(&[Table::Surahs]).await.unwrap(), 3);
        assert!(engine.store().get::<CachedSurah>("1/en.sahih").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backup_and_restore_need_owner() {
        let (engine, _temp) = setup_engine(None).await;
        assert!(matches!(
            engine.backup().await,
            Err(EngineError::Config(ConfigError::MissingParentId))
        ));

        let (engine, _temp) = setup_engine(Some("family-1")).await;
        engine.progress().add_stars("family-1", 5).await.unwrap();
        engine.backup().await.unwrap();
        assert!(engine.backup_meta().await.unwrap().exists);
        assert_eq!(engine.restore().await.unwrap().applied, 1);
    }

    #[tokio::test]
    async fn test_panicked_backup_task_is_contained() {
        let handle = tokio::spawn(async { panic!("backup task blew up") });
        stop_periodic(CancellationToken::new(), handle).await;

        let stop = CancellationToken::new();
        let waiting = stop.clone();
        let handle = tokio::spawn(async move { waiting.cancelled().await });
        stop_periodic(stop, handle).await;
    }

    #[tokio::test]
    async fn test_sync_requires_configuration() {
        let (engine, _temp) = setup_engine(Some("family-1")).await;
        let result = engine.sync(&CancellationToken::new()).await;
        assert!(matches!(result, Err(EngineError::Sync(SyncError::NotConfigured))));
    }
}
