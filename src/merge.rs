//! Monotonic merge rules for progress entities.
//!
//! Every rule only moves a value forward:
//! - counters take the maximum
//! - sets take the union
//! - booleans take the logical OR
//! - timestamps and dates take the latest, with `None` as the earliest
//! - free text (`child_name`) is overwritten only by a non-empty incoming value
//!
//! Apart from `child_name`, which is last-writer-wins, the rules are
//! commutative, associative and idempotent, so devices
//! may push in any order and any number of times.

use std::collections::BTreeMap;

use crate::models::{LetterProgress, Progress, ProgressSlice, StoryProgress, SurahProgress};

/// Merges an incoming copy of the same logical row into `self`.
pub trait Merge {
    fn merge(&mut self, incoming: &Self);

    /// Returns the merge of `self` and `incoming` without mutating either.
    fn merged(&self, incoming: &Self) -> Self
    where
        Self: Clone,
    {
        let mut out = self.clone();
        out.merge(incoming);
        out
    }
}

fn latest<T: Ord + Clone>(existing: &mut Option<T>, incoming: &Option<T>) {
    // Option orders None before Some, which is exactly "null is earliest".
    if *incoming > *existing {
        *existing = incoming.clone();
    }
}

impl Merge for Progress {
    fn merge(&mut self, incoming: &Self) {
        if self.parent_id.is_empty() {
            self.parent_id = incoming.parent_id.clone();
        }
        if let Some(name) = incoming.child_name.as_ref().filter(|n| !n.is_empty()) {
            self.child_name = Some(name.clone());
        }
        self.total_stars = self.total_stars.max(incoming.total_stars);
        self.level = self.level.max(incoming.level);
        self.current_streak = self.current_streak.max(incoming.current_streak);
        self.badges.extend(incoming.badges.iter().cloned());
        latest(&mut self.last_play_date, &incoming.last_play_date);
        latest(&mut self.updated_at, &incoming.updated_at);
    }
}

impl Merge for LetterProgress {
    fn merge(&mut self, incoming: &Self) {
        self.times_played = self.times_played.max(incoming.times_played);
        self.stars_earned = self.stars_earned.max(incoming.stars_earned);
        self.mastered |= incoming.mastered;
        latest(&mut self.last_practiced, &incoming.last_practiced);
    }
}

impl Merge for SurahProgress {
    fn merge(&mut self, incoming: &Self) {
        self.verses_heard.extend(incoming.verses_heard.iter().copied());
        self.completed |= incoming.completed;
        self.stars_earned = self.stars_earned.max(incoming.stars_earned);
        self.total_listens = self.total_listens.max(incoming.total_listens);
        latest(&mut self.last_practiced, &incoming.last_practiced);
    }
}

impl Merge for StoryProgress {
    fn merge(&mut self, incoming: &Self) {
        self.times_viewed = self.times_viewed.max(incoming.times_viewed);
        self.completed |= incoming.completed;
        self.stars_earned = self.stars_earned.max(incoming.stars_earned);
        latest(&mut self.last_viewed, &incoming.last_viewed);
    }
}

fn merge_rows<T, K, F>(existing: &mut Vec<T>, incoming: &[T], key: F)
where
    T: Merge + Clone,
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut rows: BTreeMap<K, T> = BTreeMap::new();
    for row in existing.drain(..).chain(incoming.iter().cloned()) {
        match rows.get_mut(&key(&row)) {
            Some(current) => current.merge(&row),
            None => {
                rows.insert(key(&row), row);
            }
        }
    }
    existing.extend(rows.into_values());
}

/// Table-by-table merge of two slices; child rows are matched on their
/// sub-key and the result is sorted by it.
impl Merge for ProgressSlice {
    fn merge(&mut self, incoming: &Self) {
        if let Some(other) = &incoming.progress {
            match &mut self.progress {
                Some(current) => current.merge(other),
                slot @ None => *slot = Some(other.clone()),
            }
        }
        merge_rows(&mut self.letters, &incoming.letters, |l| l.letter_id.clone());
        merge_rows(&mut self.surahs, &incoming.surahs, |s| s.surah_number);
        merge_rows(&mut self.stories, &incoming.stories, |s| s.story_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn progress(stars: i64, badges: &[&str]) -> Progress {
        let mut p = Progress::new("parent-1");
        p.total_stars = stars;
        p.badges = badges.iter().map(|b| b.to_string()).collect();
        p
    }

    fn sample_slices() -> Vec<ProgressSlice> {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();

        let mut a = ProgressSlice {
            progress: Some(progress(10, &["A"])),
            ..Default::default()
        };
        let mut letter = LetterProgress::new("parent-1", "alif");
        letter.times_played = 4;
        letter.last_practiced = Some(t1);
        a.letters.push(letter);
        let mut surah = SurahProgress::new("parent-1", 1);
        surah.verses_heard = [1, 2, 3].into_iter().collect();
        a.surahs.push(surah);

        let mut b = ProgressSlice {
            progress: Some(progress(7, &["B"])),
            ..Default::default()
        };
        let mut letter = LetterProgress::new("parent-1", "alif");
        letter.times_played = 2;
        letter.mastered = true;
        letter.last_practiced = Some(t2);
        b.letters.push(letter);
        b.letters.push(LetterProgress::new("parent-1", "ba"));
        let mut surah = SurahProgress::new("parent-1", 1);
        surah.verses_heard = [3, 4].into_iter().collect();
        surah.completed = true;
        b.surahs.push(surah);

        let mut c = ProgressSlice::default();
        let mut story = StoryProgress::new("parent-1", "yusuf-patience-en");
        story.times_viewed = 3;
        story.stars_earned = 2;
        c.stories.push(story);

        vec![ProgressSlice::default(), a, b, c]
    }

    #[test]
    fn test_example_convergence() {
        let mut local = progress(10, &["A"]);
        let server = progress(7, &["B"]);
        local.merge(&server);
        assert_eq!(local.total_stars, 10);
        assert_eq!(
            local.badges.iter().cloned().collect::<Vec<_>>(),
            vec!["A".to_string(), "B".to_string()]
        );

        let mut server = progress(7, &["B"]);
        server.merge(&progress(10, &["A"]));
        assert_eq!(server, local);
    }

    #[test]
    fn test_merge_is_idempotent() {
        for s in sample_slices() {
            for d in sample_slices() {
                let once = s.merged(&d);
                let twice = once.merged(&d);
                assert_eq!(once, twice);
            }
        }
    }

    #[test]
    fn test_merge_is_commutative() {
        let base = sample_slices();
        for s in &base {
            for d1 in &base {
                for d2 in &base {
                    let left = s.merged(d1).merged(d2);
                    let right = s.merged(d2).merged(d1);
                    assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn test_merge_is_monotonic() {
        let base = sample_slices();
        let before = &base[1];
        let after = before.merged(&base[2]);

        let (p0, p1) = (before.progress.as_ref().unwrap(), after.progress.as_ref().unwrap());
        assert!(p1.total_stars >= p0.total_stars);
        assert!(p1.badges.is_superset(&p0.badges));

        let alif = after.letters.iter().find(|l| l.letter_id == "alif").unwrap();
        assert_eq!(alif.times_played, 4);
        assert!(alif.mastered);

        let surah = &after.surahs[0];
        assert_eq!(surah.verses_heard.len(), 4);
        assert!(surah.completed);
    }

    #[test]
    fn test_timestamps_take_latest_and_none_is_earliest() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        let mut a = StoryProgress::new("p", "s");
        a.last_viewed = Some(late);
        let mut b = StoryProgress::new("p", "s");
        b.last_viewed = Some(early);
        a.merge(&b);
        assert_eq!(a.last_viewed, Some(late));

        let mut empty = StoryProgress::new("p", "s");
        empty.merge(&b);
        assert_eq!(empty.last_viewed, Some(early));

        let mut p = Progress::new("p");
        p.last_play_date = NaiveDate::from_ymd_opt(2026, 2, 3);
        p.merge(&Progress::new("p"));
        assert_eq!(p.last_play_date, NaiveDate::from_ymd_opt(2026, 2, 3));
    }

    #[test]
    fn test_child_name_only_overwritten_by_value() {
        let mut existing = Progress::new("p");
        existing.child_name = Some("Maryam".to_string());

        existing.merge(&Progress::new("p"));
        assert_eq!(existing.child_name.as_deref(), Some("Maryam"));

        let mut renamed = Progress::new("p");
        renamed.child_name = Some("Maryam A.".to_string());
        existing.merge(&renamed);
        assert_eq!(existing.child_name.as_deref(), Some("Maryam A."));
    }

    #[test]
    fn test_booleans_never_flip_back() {
        let mut mastered = LetterProgress::new("p", "alif");
        mastered.mastered = true;
        mastered.merge(&LetterProgress::new("p", "alif"));
        assert!(mastered.mastered);
    }
}
