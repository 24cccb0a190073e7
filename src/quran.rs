//! Quran reference data needed to enumerate download work lists.

pub const SURAH_COUNT: u32 = 114;
pub const VERSE_TOTAL: u32 = 6236;
pub const JUZ_COUNT: u32 = 30;

/// Verse count of each surah, indexed by surah number - 1.
const VERSE_COUNTS: [u32; 114] = [
    7, 286, 200, 176, 120, 165, 206, 75, 129, 109, //
    123, 111, 43, 52, 99, 128, 111, 110, 98, 135, //
    112, 78, 118, 64, 77, 227, 93, 88, 69, 60, //
    34, 30, 73, 54, 45, 83, 182, 88, 75, 85, //
    54, 53, 89, 59, 37, 35, 38, 29, 18, 45, //
    60, 49, 62, 55, 78, 96, 29, 22, 24, 13, //
    14, 11, 11, 18, 12, 12, 30, 52, 52, 44, //
    28, 28, 20, 56, 40, 31, 50, 40, 46, 42, //
    29, 19, 36, 25, 22, 17, 19, 26, 30, 20, //
    15, 21, 11, 8, 8, 19, 5, 8, 8, 11, //
    11, 8, 3, 9, 5, 4, 7, 3, 6, 3, //
    5, 4, 5, 6,
];

/// First (surah, verse) of each Juz.
const JUZ_STARTS: [(u32, u32); 30] = [
    (1, 1),
    (2, 142),
    (2, 253),
    (3, 93),
    (4, 24),
    (4, 148),
    (5, 82),
    (6, 111),
    (7, 88),
    (8, 41),
    (9, 93),
    (11, 6),
    (12, 53),
    (15, 1),
    (17, 1),
    (18, 75),
    (21, 1),
    (23, 1),
    (25, 21),
    (27, 56),
    (29, 46),
    (33, 31),
    (36, 28),
    (39, 32),
    (41, 47),
    (46, 1),
    (51, 31),
    (58, 1),
    (67, 1),
    (78, 1),
];

/// Number of verses in `surah`, or `None` outside 1..=114.
pub fn verse_count(surah: u32) -> Option<u32> {
    if surah == 0 {
        return None;
    }
    VERSE_COUNTS.get(surah as usize - 1).copied()
}

pub fn is_valid_verse(surah: u32, verse: u32) -> bool {
    verse_count(surah).is_some_and(|count| (1..=count).contains(&verse))
}

/// Position of a verse in the whole Quran, 1..=6236. Audio CDNs index
/// recitations by this number.
pub fn global_verse_number(surah: u32, verse: u32) -> Option<u32> {
    if !is_valid_verse(surah, verse) {
        return None;
    }
    let before: u32 = VERSE_COUNTS[..surah as usize - 1].iter().sum();
    Some(before + verse)
}

/// All (surah, verse) pairs of a Juz, in reading order.
pub fn juz_verses(juz: u32) -> Option<Vec<(u32, u32)>> {
    if !(1..=JUZ_COUNT).contains(&juz) {
        return None;
    }
    let (start_surah, start_verse) = JUZ_STARTS[juz as usize - 1];
    let end = JUZ_STARTS.get(juz as usize).copied();

    let mut verses = Vec::new();
    let mut surah = start_surah;
    let mut verse = start_verse;
    while surah <= SURAH_COUNT {
        if Some((surah, verse)) == end {
            break;
        }
        verses.push((surah, verse));
        if verse < VERSE_COUNTS[surah as usize - 1] {
            verse += 1;
        } else {
            surah += 1;
            verse = 1;
        }
    }
    Some(verses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verse_total() {
        assert_eq!(VERSE_COUNTS.iter().sum::<u32>(), VERSE_TOTAL);
    }

    #[test]
    fn test_verse_count_bounds() {
        assert_eq!(verse_count(1), Some(7));
        assert_eq!(verse_count(2), Some(286));
        assert_eq!(verse_count(114), Some(6));
        assert_eq!(verse_count(0), None);
        assert_eq!(verse_count(115), None);
    }

    #[test]
    fn test_global_verse_number() {
        assert_eq!(global_verse_number(1, 1), Some(1));
        assert_eq!(global_verse_number(2, 1), Some(8));
        assert_eq!(global_verse_number(112, 1), Some(6222));
        assert_eq!(global_verse_number(114, 6), Some(VERSE_TOTAL));
        assert_eq!(global_verse_number(1, 8), None);
    }

    #[test]
    fn test_juz_covers_every_verse_once() {
        let total: usize = (1..=JUZ_COUNT)
            .map(|j| juz_verses(j).unwrap().len())
            .sum();
        assert_eq!(total, VERSE_TOTAL as usize);
    }

    #[test]
    fn test_juz_amma() {
        let verses = juz_verses(30).unwrap();
        assert_eq!(verses.first(), Some(&(78, 1)));
        assert_eq!(verses.last(), Some(&(114, 6)));
        assert_eq!(verses.len(), 564);
        assert!(juz_verses(31).is_none());
    }
}
