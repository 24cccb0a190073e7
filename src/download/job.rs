//! Job specifications and the ordered work queue they expand into.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::db::{audio_key, story_key, surah_key, Table};
use crate::quran;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Surah,
    Audio,
    Story,
    Asset,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Surah => write!(f, "surah"),
            ContentKind::Audio => write!(f, "audio"),
            ContentKind::Story => write!(f, "story"),
            ContentKind::Asset => write!(f, "asset"),
        }
    }
}

/// One unit of work: a single cacheable item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Surah {
        number: u32,
        edition: String,
    },
    Audio {
        surah: u32,
        verse: u32,
        reciter: String,
    },
    Story {
        prophet: String,
        topic: String,
        language: String,
    },
    Asset {
        url: String,
    },
}

impl WorkItem {
    pub fn kind(&self) -> ContentKind {
        match self {
            WorkItem::Surah { .. } => ContentKind::Surah,
            WorkItem::Audio { .. } => ContentKind::Audio,
            WorkItem::Story { .. } => ContentKind::Story,
            WorkItem::Asset { .. } => ContentKind::Asset,
        }
    }

    pub fn table(&self) -> Table {
        match self {
            WorkItem::Surah { .. } => Table::Surahs,
            WorkItem::Audio { .. } => Table::Audio,
            WorkItem::Story { .. } => Table::Stories,
            WorkItem::Asset { .. } => Table::Assets,
        }
    }

    /// The cache key the item will be stored under.
    pub fn key(&self) -> String {
        match self {
            WorkItem::Surah { number, edition } => surah_key(*number, edition),
            WorkItem::Audio {
                surah,
                verse,
                reciter,
            } => audio_key(*surah, *verse, reciter),
            WorkItem::Story {
                prophet,
                topic,
                language,
            } => story_key(prophet, topic, language),
            WorkItem::Asset { url } => url.clone(),
        }
    }
}

/// Which verses an audio job covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioScope {
    Surahs(Vec<u32>),
    Juz(u32),
}

/// A target set to bring into the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    Surahs {
        edition: String,
        surahs: Vec<u32>,
    },
    VerseAudio {
        reciter: String,
        scope: AudioScope,
    },
    /// Every prophet x topic x language combination, nested in that order.
    Stories {
        prophets: Vec<String>,
        topics: Vec<String>,
        languages: Vec<String>,
    },
    StaticAssets {
        urls: Vec<String>,
    },
}

impl JobSpec {
    pub fn all_surahs(edition: impl Into<String>) -> Self {
        JobSpec::Surahs {
            edition: edition.into(),
            surahs: (1..=quran::SURAH_COUNT).collect(),
        }
    }

    pub fn juz_audio(reciter: impl Into<String>, juz: u32) -> Self {
        JobSpec::VerseAudio {
            reciter: reciter.into(),
            scope: AudioScope::Juz(juz),
        }
    }

    pub fn surah_audio(reciter: impl Into<String>, surahs: Vec<u32>) -> Self {
        JobSpec::VerseAudio {
            reciter: reciter.into(),
            scope: AudioScope::Surahs(surahs),
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            JobSpec::Surahs { .. } => ContentKind::Surah,
            JobSpec::VerseAudio { .. } => ContentKind::Audio,
            JobSpec::Stories { .. } => ContentKind::Story,
            JobSpec::StaticAssets { .. } => ContentKind::Asset,
        }
    }

    /// Expands the job into its fixed, deterministic work order.
    pub fn work_queue(&self) -> Result<WorkQueue, String> {
        let mut items = Vec::new();

        match self {
            JobSpec::Surahs { edition, surahs } => {
                for &number in surahs {
                    if quran::verse_count(number).is_none() {
                        return Err(format!("surah {} does not exist", number));
                    }
                    items.push(WorkItem::Surah {
                        number,
                        edition: edition.clone(),
                    });
                }
            }
            JobSpec::VerseAudio { reciter, scope } => {
                let verses = match scope {
                    AudioScope::Juz(juz) => quran::juz_verses(*juz)
                        .ok_or_else(|| format!("juz {} does not exist", juz))?,
                    AudioScope::Surahs(surahs) => {
                        let mut verses = Vec::new();
                        for &surah in surahs {
                            let count = quran::verse_count(surah)
                                .ok_or_else(|| format!("surah {} does not exist", surah))?;
                            verses.extend((1..=count).map(|verse| (surah, verse)));
                        }
                        verses
                    }
                };
                items.extend(verses.into_iter().map(|(surah, verse)| WorkItem::Audio {
                    surah,
                    verse,
                    reciter: reciter.clone(),
                }));
            }
            JobSpec::Stories {
                prophets,
                topics,
                languages,
            } => {
                for prophet in prophets {
                    for topic in topics {
                        for language in languages {
                            items.push(WorkItem::Story {
                                prophet: prophet.clone(),
                                topic: topic.clone(),
                                language: language.clone(),
                            });
                        }
                    }
                }
            }
            JobSpec::StaticAssets { urls } => {
                let mut seen = HashSet::new();
                for url in urls {
                    let url = url.trim();
                    if url.is_empty() || !seen.insert(url.to_string()) {
                        continue;
                    }
                    items.push(WorkItem::Asset {
                        url: url.to_string(),
                    });
                }
            }
        }

        Ok(WorkQueue::new(items))
    }
}

/// Ordered work list consumed by a single worker.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
    total: usize,
    next_index: usize,
}

impl WorkQueue {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            total: items.len(),
            items: items.into(),
            next_index: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    /// Next item with its zero-based position in the job.
    pub fn pop(&mut self) -> Option<(usize, WorkItem)> {
        let item = self.items.pop_front()?;
        let index = self.next_index;
        self.next_index += 1;
        Some((index, item))
    }
}
