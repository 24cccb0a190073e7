use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single verse as cached with its surah.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ayah {
    /// Position within the surah, starting at 1.
    pub number_in_surah: u32,
    /// Position within the whole Quran (1..=6236).
    pub global_number: u32,
    pub text: String,
    pub translation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedSurah {
    pub surah_number: u32,
    pub translation_edition: String,
    pub name: Option<String>,
    pub english_name: Option<String>,
    pub ayahs: Vec<Ayah>,
    pub cached_at: DateTime<Utc>,
}

impl CachedSurah {
    pub fn new(surah_number: u32, translation_edition: impl Into<String>) -> Self {
        Self {
            surah_number,
            translation_edition: translation_edition.into(),
            name: None,
            english_name: None,
            ayahs: Vec::new(),
            cached_at: Utc::now(),
        }
    }

    pub fn with_ayahs(mut self, ayahs: Vec<Ayah>) -> Self {
        self.ayahs = ayahs;
        self
    }
}

/// Recitation audio for one verse.
///
/// The bytes live in the store's blob column, so they are skipped when the
/// metadata is serialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedAudio {
    pub surah_number: u32,
    pub verse_number: u32,
    pub reciter_id: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
    pub cached_at: DateTime<Utc>,
}

impl CachedAudio {
    pub fn new(
        surah_number: u32,
        verse_number: u32,
        reciter_id: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            surah_number,
            verse_number,
            reciter_id: reciter_id.into(),
            size_bytes: bytes.len() as u64,
            bytes,
            cached_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedStory {
    pub prophet: String,
    pub topic: String,
    pub language: String,
    pub raw_text: String,
    pub cleaned_text: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub scene_prompts: Vec<String>,
    pub cached_at: DateTime<Utc>,
}

/// A static asset (icon, font, illustration) cached by URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedAsset {
    pub url: String,
    pub content_type: Option<String>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
    pub cached_at: DateTime<Utc>,
}

impl CachedAsset {
    pub fn new(url: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            content_type,
            size_bytes: bytes.len() as u64,
            bytes,
            cached_at: Utc::now(),
        }
    }
}

impl fmt::Display for CachedSurah {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Surah {} ({}, {} ayahs)",
            self.surah_number,
            self.translation_edition,
            self.ayahs.len()
        )
    }
}
