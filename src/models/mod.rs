mod content;
mod progress;

pub use content::{Ayah, CachedAsset, CachedAudio, CachedStory, CachedSurah};
pub use progress::{LetterProgress, Progress, ProgressSlice, StoryProgress, SurahProgress};
