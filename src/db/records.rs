//! Table bindings and semantic keys for every stored entity.
//!
//! Keys are derived from an entity's identity, never generated, so writing
//! the same content twice replaces the row instead of duplicating it.

use super::store::{Record, Table};
use crate::models::{
    CachedAsset, CachedAudio, CachedStory, CachedSurah, LetterProgress, Progress, StoryProgress,
    SurahProgress,
};

pub fn surah_key(surah_number: u32, edition: &str) -> String {
    format!("{}/{}", surah_number, edition)
}

pub fn audio_key(surah_number: u32, verse_number: u32, reciter_id: &str) -> String {
    format!("{}/{}/{}", surah_number, verse_number, reciter_id)
}

pub fn story_key(prophet: &str, topic: &str, language: &str) -> String {
    format!("{}/{}/{}", prophet, topic, language)
}

pub fn child_key(parent_id: &str, sub_key: impl std::fmt::Display) -> String {
    format!("{}/{}", parent_id, sub_key)
}

impl Record for CachedSurah {
    const TABLE: Table = Table::Surahs;

    fn key(&self) -> String {
        surah_key(self.surah_number, &self.translation_edition)
    }
}

impl Record for CachedAudio {
    const TABLE: Table = Table::Audio;

    fn key(&self) -> String {
        audio_key(self.surah_number, self.verse_number, &self.reciter_id)
    }

    fn blob(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }

    fn attach_blob(&mut self, blob: Vec<u8>) {
        self.bytes = blob;
    }
}

impl Record for CachedStory {
    const TABLE: Table = Table::Stories;

    fn key(&self) -> String {
        story_key(&self.prophet, &self.topic, &self.language)
    }
}

impl Record for CachedAsset {
    const TABLE: Table = Table::Assets;

    fn key(&self) -> String {
        self.url.clone()
    }

    fn blob(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }

    fn attach_blob(&mut self, blob: Vec<u8>) {
        self.bytes = blob;
    }
}

impl Record for Progress {
    const TABLE: Table = Table::Progress;

    fn key(&self) -> String {
        self.parent_id.clone()
    }

    fn owner(&self) -> &str {
        &self.parent_id
    }
}

impl Record for LetterProgress {
    const TABLE: Table = Table::LetterProgress;

    fn key(&self) -> String {
        child_key(&self.parent_id, &self.letter_id)
    }

    fn owner(&self) -> &str {
        &self.parent_id
    }
}

impl Record for SurahProgress {
    const TABLE: Table = Table::SurahProgress;

    fn key(&self) -> String {
        child_key(&self.parent_id, self.surah_number)
    }

    fn owner(&self) -> &str {
        &self.parent_id
    }
}

impl Record for StoryProgress {
    const TABLE: Table = Table::StoryProgress;

    fn key(&self) -> String {
        child_key(&self.parent_id, &self.story_id)
    }

    fn owner(&self) -> &str {
        &self.parent_id
    }
}
