//! Row-level validation of incoming progress rows.
//!
//! A bad row is reported as a [`RowRejection`] and skipped; it never fails
//! the rest of the batch. That includes rows that do not decode at all.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{child_key, Table};
use crate::models::{LetterProgress, Progress, ProgressSlice, StoryProgress, SurahProgress};
use crate::quran;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RowRejection {
    pub table: String,
    pub key: String,
    pub reason: String,
}

impl RowRejection {
    pub fn new(table: &str, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            key: key.into(),
            reason: reason.into(),
        }
    }
}

fn check_owner(row_owner: &str, owner: &str) -> Result<(), String> {
    if !row_owner.is_empty() && row_owner != owner {
        return Err(format!(
            "parentId '{}' does not match the authenticated owner",
            row_owner
        ));
    }
    Ok(())
}

fn check_counters(counters: &[(&str, i64)]) -> Result<(), String> {
    for (name, value) in counters {
        if *value < 0 {
            return Err(format!("{} must not be negative (got {})", name, value));
        }
    }
    Ok(())
}

pub fn progress(row: &Progress, owner: &str) -> Result<(), String> {
    check_owner(&row.parent_id, owner)?;
    check_counters(&[
        ("totalStars", row.total_stars),
        ("level", row.level),
        ("currentStreak", row.current_streak),
    ])
}

pub fn letter(row: &LetterProgress, owner: &str) -> Result<(), String> {
    check_owner(&row.parent_id, owner)?;
    if row.letter_id.trim().is_empty() {
        return Err("letterId is required".to_string());
    }
    check_counters(&[
        ("timesPlayed", row.times_played),
        ("starsEarned", row.stars_earned),
    ])
}

pub fn surah(row: &SurahProgress, owner: &str) -> Result<(), String> {
    check_owner(&row.parent_id, owner)?;
    let Some(count) = quran::verse_count(row.surah_number) else {
        return Err(format!(
            "surahNumber {} is outside 1..={}",
            row.surah_number,
            quran::SURAH_COUNT
        ));
    };
    if let Some(bad) = row.verses_heard.iter().find(|v| **v == 0 || **v > count) {
        return Err(format!(
            "verse {} does not exist in surah {} ({} verses)",
            bad, row.surah_number, count
        ));
    }
    check_counters(&[
        ("starsEarned", row.stars_earned),
        ("totalListens", row.total_listens),
    ])
}

pub fn story(row: &StoryProgress, owner: &str) -> Result<(), String> {
    check_owner(&row.parent_id, owner)?;
    if row.story_id.trim().is_empty() {
        return Err("storyId is required".to_string());
    }
    check_counters(&[
        ("timesViewed", row.times_viewed),
        ("starsEarned", row.stars_earned),
    ])
}

/// Checks every row of a slice against `owner`, in apply order.
pub fn slice(slice: &ProgressSlice, owner: &str) -> Vec<RowRejection> {
    let mut rejected = Vec::new();
    if let Some(row) = &slice.progress {
        if let Err(reason) = progress(row, owner) {
            rejected.push(RowRejection::new(Table::Progress.name(), owner, reason));
        }
    }
    for row in &slice.letters {
        if let Err(reason) = letter(row, owner) {
            let key = child_key(owner, &row.letter_id);
            rejected.push(RowRejection::new(Table::LetterProgress.name(), key, reason));
        }
    }
    for row in &slice.surahs {
        if let Err(reason) = surah(row, owner) {
            let key = child_key(owner, row.surah_number);
            rejected.push(RowRejection::new(Table::SurahProgress.name(), key, reason));
        }
    }
    for row in &slice.stories {
        if let Err(reason) = story(row, owner) {
            let key = child_key(owner, &row.story_id);
            rejected.push(RowRejection::new(Table::StoryProgress.name(), key, reason));
        }
    }
    rejected
}

/// A pushed slice with its rows still undecoded.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSlice {
    #[serde(default)]
    progress: Option<Value>,
    #[serde(default)]
    letters: Vec<Value>,
    #[serde(default)]
    surahs: Vec<Value>,
    #[serde(default)]
    stories: Vec<Value>,
}

/// Decodes a push body row by row. Only a body that is not JSON, or whose
/// top level is not a slice, is an error; rows that fail to decode come
/// back as rejections next to the rows that did.
pub fn decode_slice(
    body: &[u8],
    owner: &str,
) -> Result<(ProgressSlice, Vec<RowRejection>), serde_json::Error> {
    let raw: RawSlice = serde_json::from_slice(body)?;
    let mut rejected = Vec::new();

    let progress = match raw.progress {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value::<Progress>(value) {
            Ok(row) => Some(row),
            Err(e) => {
                rejected.push(RowRejection::new(
                    Table::Progress.name(),
                    owner,
                    format!("malformed row: {}", e),
                ));
                None
            }
        },
    };

    Ok((
        ProgressSlice {
            progress,
            letters: decode_rows(raw.letters, Table::LetterProgress, "letterId", owner, &mut rejected),
            surahs: decode_rows(raw.surahs, Table::SurahProgress, "surahNumber", owner, &mut rejected),
            stories: decode_rows(raw.stories, Table::StoryProgress, "storyId", owner, &mut rejected),
        },
        rejected,
    ))
}

fn decode_rows<T: DeserializeOwned>(
    rows: Vec<Value>,
    table: Table,
    id_field: &str,
    owner: &str,
    rejected: &mut Vec<RowRejection>,
) -> Vec<T> {
    let mut decoded = Vec::with_capacity(rows.len());
    for (index, value) in rows.into_iter().enumerate() {
        let id = match value.get(id_field) {
            Some(Value::String(id)) => id.clone(),
            Some(id) if !id.is_null() => id.to_string(),
            _ => format!("#{}", index),
        };
        match serde_json::from_value(value) {
            Ok(row) => decoded.push(row),
            Err(e) => rejected.push(RowRejection::new(
                table.name(),
                child_key(owner, id),
                format!("malformed row: {}", e),
            )),
        }
    }
    decoded
}
