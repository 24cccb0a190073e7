use chrono::{Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::records::child_key;
use super::store::{LocalStore, StoreError, Table};
use crate::models::{LetterProgress, Progress, ProgressSlice, StoryProgress, SurahProgress};
use crate::quran;
use crate::validate::{self, RowRejection};

/// Stars needed to advance one level during local play.
pub const STARS_PER_LEVEL: i64 = 50;

/// Outcome of merging a slice into a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub applied: usize,
    pub rejected: Vec<RowRejection>,
    pub cancelled: bool,
}

fn invalid(table: Table, key: String, reason: String) -> StoreError {
    StoreError::Invalid { table, key, reason }
}

/// Progress tables of a [`LocalStore`]: gameplay writes, slice export and
/// monotonic slice import.
#[derive(Clone, Debug)]
pub struct ProgressRepository {
    store: LocalStore,
}

impl ProgressRepository {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Returns the owner's summary row, creating it on first use.
    pub async fn ensure_progress(&self, owner: &str) -> Result<Progress, StoreError> {
        if let Some(progress) = self.store.get::<Progress>(owner).await? {
            return Ok(progress);
        }
        tracing::debug!("Creating progress row for {}", owner);
        self.store.merge_record(&Progress::new(owner)).await
    }

    /// Everything stored for one owner.
    pub async fn load_slice(&self, owner: &str) -> Result<ProgressSlice, StoreError> {
        Ok(ProgressSlice {
            progress: self.store.get(owner).await?,
            letters: self.store.scan_owner(owner).await?,
            surahs: self.store.scan_owner(owner).await?,
            stories: self.store.scan_owner(owner).await?,
        })
    }

    /// Every progress row in the store, regardless of owner.
    pub async fn load_all(&self) -> Result<Vec<ProgressSlice>, StoreError> {
        let mut slices = Vec::new();
        for progress in self.store.scan_all::<Progress>().await? {
            let mut slice = self.load_slice(&progress.parent_id).await?;
            slice.normalize();
            slices.push(slice);
        }
        Ok(slices)
    }

    /// Merges `slice` into the owner's rows: summary row first, then letters,
    /// surahs and stories. Each row is validated and merged on its own, so
    /// a bad row is reported without blocking the rest. Rows are stamped
    /// with `owner` as their parent.
    pub async fn apply_slice(
        &self,
        owner: &str,
        slice: &ProgressSlice,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, StoreError> {
        let mut report = ApplyReport::default();
        self.ensure_progress(owner).await?;

        if let Some(progress) = &slice.progress {
            match validate::progress(progress, owner) {
                Ok(()) => {
                    let mut row = progress.clone();
                    row.parent_id = owner.to_string();
                    self.store.merge_record(&row).await?;
                    report.applied += 1;
                }
                Err(reason) => report.rejected.push(RowRejection::new(
                    Table::Progress.name(),
                    owner,
                    reason,
                )),
            }
        }

        for letter in &slice.letters {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let key = child_key(owner, &letter.letter_id);
            match validate::letter(letter, owner) {
                Ok(()) => {
                    let mut row = letter.clone();
                    row.parent_id = owner.to_string();
                    self.store.merge_record(&row).await?;
                    report.applied += 1;
                }
                Err(reason) => report.rejected.push(RowRejection::new(
                    Table::LetterProgress.name(),
                    key,
                    reason,
                )),
            }
        }

        for surah in &slice.surahs {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let key = child_key(owner, surah.surah_number);
            match validate::surah(surah, owner) {
                Ok(()) => {
                    let mut row = surah.clone();
                    row.parent_id = owner.to_string();
                    self.store.merge_record(&row).await?;
                    report.applied += 1;
                }
                Err(reason) => report.rejected.push(RowRejection::new(
                    Table::SurahProgress.name(),
                    key,
                    reason,
                )),
            }
        }

        for story in &slice.stories {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let key = child_key(owner, &story.story_id);
            match validate::story(story, owner) {
                Ok(()) => {
                    let mut row = story.clone();
                    row.parent_id = owner.to_string();
                    self.store.merge_record(&row).await?;
                    report.applied += 1;
                }
                Err(reason) => report.rejected.push(RowRejection::new(
                    Table::StoryProgress.name(),
                    key,
                    reason,
                )),
            }
        }

        if !report.rejected.is_empty() {
            tracing::warn!(
                "Rejected {} row(s) for {}",
                report.rejected.len(),
                owner
            );
        }

        Ok(report)
    }

    /// Adds stars for a play session and updates level, streak and play date.
    pub async fn add_stars(&self, owner: &str, stars: i64) -> Result<Progress, StoreError> {
        let mut progress = self.ensure_progress(owner).await?;
        let today = Utc::now().date_naive();

        progress.total_stars += stars.max(0);
        progress.level = progress
            .level
            .max(1 + progress.total_stars / STARS_PER_LEVEL);
        progress.current_streak = match progress.last_play_date {
            Some(last) if last == today => progress.current_streak.max(1),
            Some(last) if last + Duration::days(1) == today => progress.current_streak + 1,
            _ => 1,
        };
        progress.last_play_date = Some(today);
        progress.updated_at = Some(Utc::now());

        self.store.put(&progress).await?;
        Ok(progress)
    }

    pub async fn award_badge(&self, owner: &str, badge: &str) -> Result<Progress, StoreError> {
        let mut progress = self.ensure_progress(owner).await?;
        if progress.badges.insert(badge.to_string()) {
            progress.updated_at = Some(Utc::now());
            self.store.put(&progress).await?;
            tracing::info!("Awarded badge {} to {}", badge, owner);
        }
        Ok(progress)
    }

    pub async fn record_letter_play(
        &self,
        owner: &str,
        letter_id: &str,
        stars: i64,
        mastered: bool,
    ) -> Result<LetterProgress, StoreError> {
        let key = child_key(owner, letter_id);
        validate::letter(&LetterProgress::new(owner, letter_id), owner)
            .map_err(|reason| invalid(Table::LetterProgress, key.clone(), reason))?;

        self.ensure_progress(owner).await?;
        let mut row = self
            .store
            .get::<LetterProgress>(&key)
            .await?
            .unwrap_or_else(|| LetterProgress::new(owner, letter_id));

        row.times_played += 1;
        row.stars_earned += stars.max(0);
        row.mastered |= mastered;
        row.last_practiced = Some(Utc::now());

        self.store.put(&row).await?;
        self.add_stars(owner, stars).await?;
        Ok(row)
    }

    /// Marks a verse as heard; the surah completes once every verse has been.
    /// Nothing is written for a surah or verse that does not exist.
    pub async fn record_verse_heard(
        &self,
        owner: &str,
        surah_number: u32,
        verse: u32,
        stars: i64,
    ) -> Result<SurahProgress, StoreError> {
        let key = child_key(owner, surah_number);
        let mut candidate = SurahProgress::new(owner, surah_number);
        candidate.verses_heard.insert(verse);
        validate::surah(&candidate, owner)
            .map_err(|reason| invalid(Table::SurahProgress, key.clone(), reason))?;

        self.ensure_progress(owner).await?;
        let mut row = self
            .store
            .get::<SurahProgress>(&key)
            .await?
            .unwrap_or_else(|| SurahProgress::new(owner, surah_number));

        row.verses_heard.insert(verse);
        row.total_listens += 1;
        row.stars_earned += stars.max(0);
        if let Some(count) = quran::verse_count(surah_number) {
            row.completed |= row.verses_heard.len() as u32 >= count;
        }
        row.last_practiced = Some(Utc::now());

        self.store.put(&row).await?;
        self.add_stars(owner, stars).await?;
        Ok(row)
    }

    pub async fn record_story_view(
        &self,
        owner: &str,
        story_id: &str,
        completed: bool,
        stars: i64,
    ) -> Result<StoryProgress, StoreError> {
        let key = child_key(owner, story_id);
        validate::story(&StoryProgress::new(owner, story_id), owner)
            .map_err(|reason| invalid(Table::StoryProgress, key.clone(), reason))?;

        self.ensure_progress(owner).await?;
        let mut row = self
            .store
            .get::<StoryProgress>(&key)
            .await?
            .unwrap_or_else(|| StoryProgress::new(owner, story_id));

        row.times_viewed += 1;
        row.completed |= completed;
        row.stars_earned += stars.max(0);
        row.last_viewed = Some(Utc::now());

        self.store.put(&row).await?;
        self.add_stars(owner, stars).await?;
        Ok(row)
    }
}
