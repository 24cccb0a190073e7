//! Bulk download of content into the local store.
//!
//! A job expands into an ordered work queue that a single worker drains one
//! item at a time. Cached items are skipped, failures are recorded and the
//! worker moves on, and the caller gets a report back in every case except
//! when there is no connectivity at all.

mod job;
mod sources;

pub use job::{AudioScope, ContentKind, JobSpec, WorkItem, WorkQueue};
pub use sources::{
    AssetFetcher, ConnectivityProbe, FetchError, GeneratedStory, HttpAssetFetcher, HttpProbe,
    HttpQuranSource, HttpSourceConfig, HttpStoryGenerator, QuranSource, Sources, StoryGenerator,
    SurahContent,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::{LocalStore, StoreError};
use crate::models::{CachedAsset, CachedAudio, CachedStory, CachedSurah};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Network unavailable")]
    NetworkUnavailable,
    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

/// Failure of a single item. Recorded in the report, never returned from `run`.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Pause between consecutive network fetches, per content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delays {
    #[serde(with = "millis")]
    pub surah: Duration,
    #[serde(with = "millis")]
    pub audio: Duration,
    #[serde(with = "millis")]
    pub story: Duration,
    #[serde(with = "millis")]
    pub asset: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            surah: Duration::from_millis(300),
            audio: Duration::from_millis(100),
            story: Duration::from_secs(2),
            asset: Duration::from_millis(50),
        }
    }
}

impl Delays {
    pub fn none() -> Self {
        Self {
            surah: Duration::ZERO,
            audio: Duration::ZERO,
            story: Duration::ZERO,
            asset: Duration::ZERO,
        }
    }

    pub fn for_kind(&self, kind: ContentKind) -> Duration {
        match kind {
            ContentKind::Surah => self.surah,
            ContentKind::Audio => self.audio,
            ContentKind::Story => self.story,
            ContentKind::Asset => self.asset,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Re-fetch items even when they are already cached.
    pub force: bool,
    /// Only count what would be fetched; no collaborator is called.
    pub dry_run: bool,
    pub delays: Delays,
    pub item_timeout: Duration,
    /// Consecutive failures that trigger a longer pause.
    pub failure_burst: u32,
    pub failure_pause: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            delays: Delays::default(),
            item_timeout: Duration::from_secs(30),
            failure_burst: 5,
            failure_pause: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Downloaded,
    Skipped,
    Failed,
    WouldDownload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub key: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub index: usize,
    pub key: String,
    pub error: String,
}

/// Emitted once per processed item; `current` counts from 1.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub current: usize,
    pub total: usize,
    pub key: String,
    pub status: ItemStatus,
}

impl DownloadProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current * 100) / self.total) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadReport {
    pub kind: ContentKind,
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: Vec<FailedItem>,
    pub would_download: usize,
    pub cancelled: bool,
    pub outcomes: Vec<ItemOutcome>,
}

impl DownloadReport {
    fn new(kind: ContentKind, total: usize) -> Self {
        Self {
            kind,
            total,
            downloaded: 0,
            skipped: 0,
            failed: Vec::new(),
            would_download: 0,
            cancelled: false,
            outcomes: Vec::with_capacity(total),
        }
    }

    fn record(&mut self, index: usize, key: String, result: Result<ItemStatus, ItemError>) -> ItemStatus {
        let (status, error) = match result {
            Ok(status) => (status, None),
            Err(e) => (ItemStatus::Failed, Some(e.to_string())),
        };

        match status {
            ItemStatus::Downloaded => self.downloaded += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::WouldDownload => self.would_download += 1,
            ItemStatus::Failed => self.failed.push(FailedItem {
                index,
                key: key.clone(),
                error: error.clone().unwrap_or_default(),
            }),
        }

        self.outcomes.push(ItemOutcome {
            index,
            key,
            status,
            error,
        });
        status
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed.is_empty()
    }
}

/// Single worker that drains a job's queue into the local store.
pub struct Downloader {
    store: LocalStore,
    sources: Sources,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(store: LocalStore, sources: Sources, options: DownloadOptions) -> Self {
        Self {
            store,
            sources,
            options,
        }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub async fn run(
        &self,
        job: &JobSpec,
        on_progress: &mut (dyn FnMut(&DownloadProgress) + Send),
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, DownloadError> {
        let mut queue = job.work_queue().map_err(DownloadError::InvalidJob)?;

        if !self.options.dry_run && !self.sources.probe.is_online().await {
            tracing::warn!("No connectivity, {} job not started", job.kind());
            return Err(DownloadError::NetworkUnavailable);
        }

        let total = queue.total();
        let delay = self.options.delays.for_kind(job.kind());
        let mut report = DownloadReport::new(job.kind(), total);
        let mut fetched_before = false;
        let mut consecutive_failures = 0u32;

        tracing::info!(
            "Starting {} job: {} items (force={}, dry_run={})",
            job.kind(),
            total,
            self.options.force,
            self.options.dry_run
        );

        while let Some((index, item)) = queue.pop() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let key = item.key();
            let result = match self.is_cached(&item, &key).await {
                Ok(true) => Ok(ItemStatus::Skipped),
                Ok(false) if self.options.dry_run => Ok(ItemStatus::WouldDownload),
                Ok(false) => {
                    if fetched_before {
                        let mut pause = delay;
                        if self.options.failure_burst > 0
                            && consecutive_failures >= self.options.failure_burst
                        {
                            tracing::warn!(
                                "{} consecutive failures, pausing for {:?}",
                                consecutive_failures,
                                self.options.failure_pause
                            );
                            pause = pause.max(self.options.failure_pause);
                            consecutive_failures = 0;
                        }
                        if !wait(pause, cancel).await {
                            report.cancelled = true;
                            break;
                        }
                    }
                    fetched_before = true;

                    let fetched = self.fetch_with_timeout(&item).await;
                    match fetched {
                        Ok(()) => consecutive_failures = 0,
                        Err(_) => consecutive_failures += 1,
                    }
                    fetched.map(|()| ItemStatus::Downloaded)
                }
                Err(e) => Err(e),
            };

            if let Err(e) = &result {
                tracing::warn!("Item {} ({}) failed: {}", index + 1, key, e);
            }

            let status = report.record(index, key.clone(), result);
            on_progress(&DownloadProgress {
                current: index + 1,
                total,
                key,
                status,
            });
        }

        tracing::info!(
            "{} job finished: {} downloaded, {} skipped, {} failed{}",
            job.kind(),
            report.downloaded,
            report.skipped,
            report.failed.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );

        Ok(report)
    }

    async fn is_cached(&self, item: &WorkItem, key: &str) -> Result<bool, ItemError> {
        if self.options.force {
            return Ok(false);
        }
        Ok(self.store.contains(item.table(), key).await?)
    }

    async fn fetch_with_timeout(&self, item: &WorkItem) -> Result<(), ItemError> {
        let limit = self.options.item_timeout;
        match tokio::time::timeout(limit, self.fetch_and_store(item)).await {
            Ok(result) => result,
            Err(_) => Err(ItemError::Timeout(limit)),
        }
    }

    async fn fetch_and_store(&self, item: &WorkItem) -> Result<(), ItemError> {
        match item {
            WorkItem::Surah { number, edition } => {
                let content = self.sources.quran.fetch_surah(*number, edition).await?;
                let mut surah = CachedSurah::new(*number, edition.as_str()).with_ayahs(content.ayahs);
                surah.name = content.name;
                surah.english_name = content.english_name;
                self.store.put(&surah).await?;
            }
            WorkItem::Audio {
                surah,
                verse,
                reciter,
            } => {
                let bytes = self
                    .sources
                    .quran
                    .fetch_verse_audio(*surah, *verse, reciter)
                    .await?;
                self.store
                    .put(&CachedAudio::new(*surah, *verse, reciter.as_str(), bytes))
                    .await?;
            }
            WorkItem::Story {
                prophet,
                topic,
                language,
            } => {
                let story = self.sources.stories.generate(prophet, topic, language).await?;
                self.store
                    .put(&CachedStory {
                        prophet: prophet.clone(),
                        topic: topic.clone(),
                        language: language.clone(),
                        raw_text: story.raw_text,
                        cleaned_text: story.cleaned_text,
                        images: Vec::new(),
                        scene_prompts: story.scene_prompts,
                        cached_at: Utc::now(),
                    })
                    .await?;
            }
            WorkItem::Asset { url } => {
                let (content_type, bytes) = self.sources.assets.fetch(url).await?;
                self.store
                    .put(&CachedAsset::new(url.as_str(), content_type, bytes))
                    .await?;
            }
        }
        Ok(())
    }
}

/// Sleeps unless cancelled first. Returns false on cancellation.
async fn wait(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::{test_store, Table};
    use crate::models::Progress;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    async fn run_job(
        downloader: &Downloader,
        job: &JobSpec,
    ) -> Result<DownloadReport, DownloadError> {
        downloader
            .run(job, &mut |_| {}, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_all_surahs_skips_cached() {
        let (store, _temp) = test_store().await;
        store.put(&CachedSurah::new(50, "en.sahih")).await.unwrap();
        let quran = Arc::new(FakeQuran::default());
        let downloader = Downloader::new(store.clone(), fake_sources(quran.clone(), true), fast_options());

        let report = run_job(&downloader, &JobSpec::all_surahs("en.sahih")).await.unwrap();

        assert_eq!(report.total, 114);
        assert_eq!(report.downloaded, 113);
        assert_eq!(report.skipped, 1);
        assert!(report.failed.is_empty());
        assert_eq!(report.outcomes[49].status, ItemStatus::Skipped);
        assert_eq!(quran.calls.load(Ordering::SeqCst), 113);

        let surah: CachedSurah = store.get("36/en.sahih").await.unwrap().unwrap();
        assert_eq!(surah.english_name.as_deref(), Some("Surah 36"));
    }

    #[tokio::test]
    async fn test_second_run_fetches_nothing() {
        let (store, _temp) = test_store().await;
        let quran = Arc::new(FakeQuran::default());
        let downloader = Downloader::new(store, fake_sources(quran.clone(), true), fast_options());
        let job = JobSpec::surah_audio("ar.alafasy", vec![1, 112]);

        let first = run_job(&downloader, &job).await.unwrap();
        assert_eq!(first.downloaded, 11);
        let calls = quran.calls.load(Ordering::SeqCst);

        let second = run_job(&downloader, &job).await.unwrap();
        assert_eq!(second.skipped, 11);
        assert_eq!(second.downloaded, 0);
        assert_eq!(quran.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_failed_item_does_not_abort_batch() {
        let (store, _temp) = test_store().await;
        let quran = Arc::new(FakeQuran::default());
        quran.failing_surahs.lock().unwrap().insert(3);
        let downloader = Downloader::new(store.clone(), fake_sources(quran.clone(), true), fast_options());
        let job = JobSpec::Surahs {
            edition: "en.sahih".to_string(),
            surahs: (1..=5).collect(),
        };

        let report = run_job(&downloader, &job).await.unwrap();
        assert_eq!(report.downloaded, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 2);
        assert_eq!(report.failed[0].key, "3/en.sahih");
        assert!(report.failed[0].error.contains("503"));
        assert_eq!(
            report
                .outcomes
                .iter()
                .filter(|o| o.status != ItemStatus::Failed)
                .count(),
            4
        );

        // Re-running retries only the missing item.
        quran.failing_surahs.lock().unwrap().clear();
        let retry = run_job(&downloader, &job).await.unwrap();
        assert_eq!(retry.downloaded, 1);
        assert_eq!(retry.skipped, 4);
    }

    #[tokio::test]
    async fn test_offline_job_does_not_start() {
        let (store, _temp) = test_store().await;
        let quran = Arc::new(FakeQuran::default());
        let downloader = Downloader::new(store, fake_sources(quran.clone(), false), fast_options());

        let result = run_job(&downloader, &JobSpec::all_surahs("en.sahih")).await;
        assert!(matches!(result, Err(DownloadError::NetworkUnavailable)));
        assert_eq!(quran.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_job() {
        let (store, _temp) = test_store().await;
        let downloader = Downloader::new(
            store,
            fake_sources(Arc::new(FakeQuran::default()), true),
            fast_options(),
        );
        let result = run_job(&downloader, &JobSpec::juz_audio("ar.alafasy", 31)).await;
        assert!(matches!(result, Err(DownloadError::InvalidJob(_))));
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_fetching() {
        let (store, _temp) = test_store().await;
        store.put(&CachedSurah::new(1, "en.sahih")).await.unwrap();
        let quran = Arc::new(FakeQuran::default());
        let options = DownloadOptions {
            dry_run: true,
            ..fast_options()
        };
        // Dry runs work offline.
        let downloader = Downloader::new(store, fake_sources(quran.clone(), false), options);

        let report = run_job(&downloader, &JobSpec::all_surahs("en.sahih")).await.unwrap();
        assert_eq!(report.would_download, 113);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.downloaded, 0);
        assert_eq!(quran.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_refetches_cached() {
        let (store, _temp) = test_store().await;
        store.put(&CachedSurah::new(1, "en.sahih")).await.unwrap();
        let quran = Arc::new(FakeQuran::default());
        let options = DownloadOptions {
            force: true,
            ..fast_options()
        };
        let downloader = Downloader::new(store, fake_sources(quran.clone(), true), options);
        let job = JobSpec::Surahs {
            edition: "en.sahih".to_string(),
            surahs: vec![1, 2],
        };

        let report = run_job(&downloader, &job).await.unwrap();
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn test_cancel_returns_partial_report() {
        let (store, _temp) = test_store().await;
        let downloader = Downloader::new(
            store,
            fake_sources(Arc::new(FakeQuran::default()), true),
            fast_options(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut seen = Vec::new();

        let report = downloader
            .run(
                &JobSpec::all_surahs("en.sahih"),
                &mut |progress| {
                    seen.push(progress.current);
                    if progress.current == 3 {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.processed(), 3);
        assert_eq!(report.downloaded, 3);
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_slow_item_times_out_and_batch_continues() {
        let (store, _temp) = test_store().await;
        let quran = Arc::new(FakeQuran::default());
        quran.slow_surahs.lock().unwrap().insert(2);
        let options = DownloadOptions {
            item_timeout: Duration::from_millis(50),
            ..fast_options()
        };
        let downloader = Downloader::new(store, fake_sources(quran, true), options);
        let job = JobSpec::Surahs {
            edition: "en.sahih".to_string(),
            surahs: vec![1, 2, 3],
        };

        let report = run_job(&downloader, &job).await.unwrap();
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "2/en.sahih");
        assert!(report.failed[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_skipped_items_incur_no_delay() {
        let (store, _temp) = test_store().await;
        for n in 1..=3 {
            store.put(&CachedSurah::new(n, "en.sahih")).await.unwrap();
        }
        let options = DownloadOptions {
            delays: Delays {
                surah: Duration::from_secs(60),
                ..Delays::default()
            },
            ..DownloadOptions::default()
        };
        let downloader = Downloader::new(
            store,
            fake_sources(Arc::new(FakeQuran::default()), true),
            options,
        );
        let job = JobSpec::Surahs {
            edition: "en.sahih".to_string(),
            surahs: vec![1, 2, 3, 4],
        };

        // Three cached items then one fetch: no pause is owed anywhere.
        let report = tokio::time::timeout(Duration::from_secs(5), run_job(&downloader, &job))
            .await
            .expect("skipped items must not wait")
            .unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(report.downloaded, 1);
    }

    #[tokio::test]
    async fn test_stories_and_assets() {
        let (store, _temp) = test_store().await;
        let downloader = Downloader::new(
            store.clone(),
            fake_sources(Arc::new(FakeQuran::default()), true),
            fast_options(),
        );

        let stories = JobSpec::Stories {
            prophets: vec!["yunus".to_string()],
            topics: vec!["whale".to_string()],
            languages: vec!["en".to_string(), "ar".to_string()],
        };
        let report = run_job(&downloader, &stories).await.unwrap();
        assert_eq!(report.downloaded, 2);
        let story: CachedStory = store.get("yunus/whale/ar").await.unwrap().unwrap();
        assert_eq!(story.cleaned_text, "yunus whale ar");

        let assets = JobSpec::StaticAssets {
            urls: vec![
                "https://cdn.example.com/icon.png".to_string(),
                "https://cdn.example.com/missing.png".to_string(),
                "https://cdn.example.com/font.woff2".to_string(),
            ],
        };
        let report = run_job(&downloader, &assets).await.unwrap();
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed.len(), 1);

        let asset: CachedAsset = store.get("https://cdn.example.com/icon.png").await.unwrap().unwrap();
        assert_eq!(asset.bytes, b"https://cdn.example.com/icon.png");
        assert_eq!(asset.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_quota_failure_is_per_item() {
        let (store, _temp) = test_store().await;
        let store = store.with_quota(Some(2000));
        store.put(&CachedSurah::new(1, "en.sahih")).await.unwrap();
        let downloader = Downloader::new(
            store.clone(),
            fake_sources(Arc::new(FakeQuran::default()), true),
            fast_options(),
        );

        let oversized = format!("https://cdn.example.com/{}.png", "b".repeat(3000));
        let job = JobSpec::StaticAssets {
            urls: vec![
                "https://cdn.example.com/a.png".to_string(),
                oversized.clone(),
                "https://cdn.example.com/c.png".to_string(),
            ],
        };
        let report = run_job(&downloader, &job).await.unwrap();

        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 1);
        assert_eq!(report.failed[0].key, oversized);
        assert!(report.failed[0].error.contains("quota exceeded"));
        assert!(!report.is_complete());

        assert!(store.contains(Table::Assets, "https://cdn.example.com/c.png").await.unwrap());
        assert!(!store.contains(Table::Assets, &oversized).await.unwrap());
        assert!(store.contains(Table::Surahs, "1/en.sahih").await.unwrap());
        store.put(&Progress::new("family-1")).await.unwrap();
    }

    #[test]
    fn test_progress_percent() {
        let progress = DownloadProgress {
            current: 57,
            total: 114,
            key: "57/en.sahih".to_string(),
            status: ItemStatus::Downloaded,
        };
        assert_eq!(progress.percent(), 50);
    }
}
