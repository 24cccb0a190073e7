//! External content collaborators and their HTTP implementations.
//!
//! The downloader only sees the traits; anything that can produce surah
//! text, verse audio, stories or asset bytes can be plugged in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::models::Ayah;
use crate::quran;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Unknown verse {0}:{1}")]
    UnknownVerse(u32, u32),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Request(e.to_string()),
        }
    }
}

/// Surah text with its translation, as returned by a Quran reference service.
#[derive(Debug, Clone, PartialEq)]
pub struct SurahContent {
    pub name: Option<String>,
    pub english_name: Option<String>,
    pub ayahs: Vec<Ayah>,
}

/// Output of the story generator for one (prophet, topic, language) tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedStory {
    pub raw_text: String,
    pub cleaned_text: String,
    #[serde(default)]
    pub scene_prompts: Vec<String>,
}

#[async_trait]
pub trait QuranSource: Send + Sync {
    async fn fetch_surah(&self, surah: u32, edition: &str) -> Result<SurahContent, FetchError>;

    async fn fetch_verse_audio(
        &self,
        surah: u32,
        verse: u32,
        reciter: &str,
    ) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate(
        &self,
        prophet: &str,
        topic: &str,
        language: &str,
    ) -> Result<GeneratedStory, FetchError>;
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Returns the content type (when known) and the body.
    async fn fetch(&self, url: &str) -> Result<(Option<String>, Vec<u8>), FetchError>;
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// The set of collaborators a downloader works with.
#[derive(Clone)]
pub struct Sources {
    pub quran: Arc<dyn QuranSource>,
    pub stories: Arc<dyn StoryGenerator>,
    pub assets: Arc<dyn AssetFetcher>,
    pub probe: Arc<dyn ConnectivityProbe>,
}

/// Settings for the HTTP collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSourceConfig {
    /// Quran text API (alquran.cloud compatible).
    pub quran_api_url: String,
    /// Verse audio CDN.
    pub audio_cdn_url: String,
    pub audio_bitrate: u32,
    /// Story generation endpoint; stories fail per item when unset.
    pub story_endpoint: Option<String>,
    /// URL checked before a job starts.
    pub health_url: String,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            quran_api_url: "https://api.alquran.cloud/v1".to_string(),
            audio_cdn_url: "https://cdn.islamic.network/quran/audio".to_string(),
            audio_bitrate: 128,
            story_endpoint: None,
            health_url: "https://api.alquran.cloud/v1/meta".to_string(),
        }
    }
}

impl Sources {
    /// Builds reqwest-backed collaborators sharing one client.
    pub fn http(config: &HttpSourceConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hikma-offline/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            quran: Arc::new(HttpQuranSource {
                client: client.clone(),
                api_url: config.quran_api_url.trim_end_matches('/').to_string(),
                audio_cdn_url: config.audio_cdn_url.trim_end_matches('/').to_string(),
                audio_bitrate: config.audio_bitrate,
            }),
            stories: Arc::new(HttpStoryGenerator {
                client: client.clone(),
                endpoint: config.story_endpoint.clone(),
            }),
            assets: Arc::new(HttpAssetFetcher {
                client: client.clone(),
            }),
            probe: Arc::new(HttpProbe {
                client,
                url: config.health_url.clone(),
            }),
        })
    }
}

pub struct HttpQuranSource {
    client: reqwest::Client,
    api_url: String,
    audio_cdn_url: String,
    audio_bitrate: u32,
}

impl HttpQuranSource {
    fn surah_url(&self, surah: u32, edition: &str) -> String {
        format!(
            "{}/surah/{}/editions/quran-uthmani,{}",
            self.api_url, surah, edition
        )
    }

    fn audio_url(&self, surah: u32, verse: u32, reciter: &str) -> Result<String, FetchError> {
        let global = quran::global_verse_number(surah, verse)
            .ok_or(FetchError::UnknownVerse(surah, verse))?;
        Ok(format!(
            "{}/{}/{}/{}.mp3",
            self.audio_cdn_url, self.audio_bitrate, reciter, global
        ))
    }
}

#[derive(Deserialize)]
struct EditionsResponse {
    data: Vec<EditionData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditionData {
    number: u32,
    name: Option<String>,
    english_name: Option<String>,
    ayahs: Vec<EditionAyah>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditionAyah {
    number: u32,
    text: String,
    number_in_surah: u32,
}

/// Pairs the Arabic edition (first) with the translation (second, optional).
fn parse_surah_editions(surah: u32, body: &str) -> Result<SurahContent, FetchError> {
    let response: EditionsResponse =
        serde_json::from_str(body).map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
    let mut editions = response.data.into_iter();

    let arabic = editions
        .next()
        .ok_or_else(|| FetchError::InvalidResponse("no editions returned".to_string()))?;
    if arabic.number != surah {
        return Err(FetchError::InvalidResponse(format!(
            "asked for surah {}, got {}",
            surah, arabic.number
        )));
    }
    let translation = editions.next();

    let ayahs = arabic
        .ayahs
        .into_iter()
        .map(|ayah| Ayah {
            number_in_surah: ayah.number_in_surah,
            global_number: ayah.number,
            translation: translation.as_ref().and_then(|t| {
                t.ayahs
                    .iter()
                    .find(|a| a.number_in_surah == ayah.number_in_surah)
                    .map(|a| a.text.clone())
            }),
            text: ayah.text,
        })
        .collect();

    Ok(SurahContent {
        name: arabic.name,
        english_name: arabic.english_name,
        ayahs,
    })
}

#[async_trait]
impl QuranSource for HttpQuranSource {
    async fn fetch_surah(&self, surah: u32, edition: &str) -> Result<SurahContent, FetchError> {
        let body = self
            .client
            .get(self.surah_url(surah, edition))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_surah_editions(surah, &body)
    }

    async fn fetch_verse_audio(
        &self,
        surah: u32,
        verse: u32,
        reciter: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let url = self.audio_url(surah, verse, reciter)?;
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

pub struct HttpStoryGenerator {
    client: reqwest::Client,
    endpoint: Option<String>,
}

#[derive(Serialize)]
struct StoryRequest<'a> {
    prophet: &'a str,
    topic: &'a str,
    language: &'a str,
}

#[async_trait]
impl StoryGenerator for HttpStoryGenerator {
    async fn generate(
        &self,
        prophet: &str,
        topic: &str,
        language: &str,
    ) -> Result<GeneratedStory, FetchError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| FetchError::Request("no story endpoint configured".to_string()))?;

        let story = self
            .client
            .post(endpoint)
            .json(&StoryRequest {
                prophet,
                topic,
                language,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<GeneratedStory>()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;
        Ok(story)
    }
}

pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> Result<(Option<String>, Vec<u8>), FetchError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        Ok((content_type, bytes.to_vec()))
    }
}

pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        // Any HTTP answer proves connectivity; only transport failures count.
        match self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Connectivity probe to {} failed: {}", self.url, e);
                false
            }
        }
    }
}
