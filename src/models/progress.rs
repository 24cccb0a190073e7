use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-owner summary row. Exactly one exists per `parent_id` once the owner
/// has played or synced at least once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub child_name: Option<String>,
    #[serde(default)]
    pub total_stars: i64,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub badges: BTreeSet<String>,
    #[serde(default)]
    pub current_streak: i64,
    #[serde(default)]
    pub last_play_date: Option<NaiveDate>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn new(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            level: 1,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LetterProgress {
    #[serde(default)]
    pub parent_id: String,
    pub letter_id: String,
    #[serde(default)]
    pub times_played: i64,
    #[serde(default)]
    pub mastered: bool,
    #[serde(default)]
    pub stars_earned: i64,
    #[serde(default)]
    pub last_practiced: Option<DateTime<Utc>>,
}

impl LetterProgress {
    pub fn new(parent_id: impl Into<String>, letter_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            letter_id: letter_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SurahProgress {
    #[serde(default)]
    pub parent_id: String,
    pub surah_number: u32,
    #[serde(default)]
    pub verses_heard: BTreeSet<u32>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub stars_earned: i64,
    #[serde(default)]
    pub total_listens: i64,
    #[serde(default)]
    pub last_practiced: Option<DateTime<Utc>>,
}

impl SurahProgress {
    pub fn new(parent_id: impl Into<String>, surah_number: u32) -> Self {
        Self {
            parent_id: parent_id.into(),
            surah_number,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoryProgress {
    #[serde(default)]
    pub parent_id: String,
    pub story_id: String,
    #[serde(default)]
    pub times_viewed: i64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub stars_earned: i64,
    #[serde(default)]
    pub last_viewed: Option<DateTime<Utc>>,
}

impl StoryProgress {
    pub fn new(parent_id: impl Into<String>, story_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            story_id: story_id.into(),
            ..Default::default()
        }
    }
}

/// Everything one owner has recorded, in the shape exchanged with the sync
/// server and written to backups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSlice {
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(default)]
    pub letters: Vec<LetterProgress>,
    #[serde(default)]
    pub surahs: Vec<SurahProgress>,
    #[serde(default)]
    pub stories: Vec<StoryProgress>,
}

impl ProgressSlice {
    pub fn is_empty(&self) -> bool {
        self.progress.is_none()
            && self.letters.is_empty()
            && self.surahs.is_empty()
            && self.stories.is_empty()
    }

    /// Number of rows carried, counting the summary row.
    pub fn row_count(&self) -> usize {
        usize::from(self.progress.is_some())
            + self.letters.len()
            + self.surahs.len()
            + self.stories.len()
    }

    /// Sorts child rows by their sub-key so two slices holding the same rows
    /// compare equal.
    pub fn normalize(&mut self) {
        self.letters.sort_by(|a, b| a.letter_id.cmp(&b.letter_id));
        self.surahs.sort_by_key(|s| s.surah_number);
        self.stories.sort_by(|a, b| a.story_id.cmp(&b.story_id));
    }
}
