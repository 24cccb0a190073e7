use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::download::{Delays, DownloadOptions, HttpSourceConfig};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// Bearer credential issued by the server admin
    pub api_token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_token: None,
            timeout_secs: 15,
        }
    }
}

impl SyncConfig {
    /// Returns true if sync is configured (has both server_url and api_token)
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some() && self.api_token.is_some()
    }
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    #[serde(flatten)]
    pub sources: HttpSourceConfig,
    /// Translation edition fetched with surah text
    pub edition: String,
    /// Reciter used for verse audio
    pub reciter: String,
    /// Delay between network fetches, in milliseconds per content type
    pub delays_ms: Delays,
    pub item_timeout_secs: u64,
    pub failure_burst: u32,
    pub failure_pause_secs: u64,
    pub prophets: Vec<String>,
    pub topics: Vec<String>,
    pub languages: Vec<String>,
    /// Static asset URLs to keep offline
    pub asset_manifest: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let options = DownloadOptions::default();
        Self {
            sources: HttpSourceConfig::default(),
            edition: "en.sahih".to_string(),
            reciter: "ar.alafasy".to_string(),
            delays_ms: options.delays,
            item_timeout_secs: options.item_timeout.as_secs(),
            failure_burst: options.failure_burst,
            failure_pause_secs: options.failure_pause.as_secs(),
            prophets: Vec::new(),
            topics: Vec::new(),
            languages: vec!["en".to_string()],
            asset_manifest: Vec::new(),
        }
    }
}

impl DownloadConfig {
    pub fn options(&self, force: bool, dry_run: bool) -> DownloadOptions {
        DownloadOptions {
            force,
            dry_run,
            delays: self.delays_ms,
            item_timeout: Duration::from_secs(self.item_timeout_secs),
            failure_burst: self.failure_burst,
            failure_pause: Duration::from_secs(self.failure_pause_secs),
        }
    }
}

/// Backup configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackupConfig {
    /// Minutes between automatic backups while a long job runs
    pub interval_minutes: Option<u64>,
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the store and the backup slot
    pub data_dir: ConfigValue<PathBuf>,
    /// Owner account this device records progress for
    pub parent_id: ConfigValue<Option<String>>,
    /// Upper bound on stored bytes; unlimited when unset
    pub quota_bytes: ConfigValue<Option<u64>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
    pub download: DownloadConfig,
    pub backup: BackupConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    parent_id: Option<String>,
    quota_bytes: Option<u64>,
    sync: Option<SyncConfig>,
    download: Option<DownloadConfig>,
    backup: Option<BackupConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self {
            data_dir: ConfigValue::new(Self::default_data_dir(), ConfigSource::Default),
            parent_id: ConfigValue::new(None, ConfigSource::Default),
            quota_bytes: ConfigValue::new(None, ConfigSource::Default),
            config_file: None,
            sync: SyncConfig::default(),
            download: DownloadConfig::default(),
            backup: BackupConfig::default(),
        };

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config.config_file = Some(path.clone());

            if let Some(dir) = file_config.data_dir {
                // Resolve relative paths against config file's directory
                let resolved = if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                };
                config.data_dir = ConfigValue::new(resolved, ConfigSource::File);
            }
            if let Some(parent_id) = file_config.parent_id {
                config.parent_id = ConfigValue::new(Some(parent_id), ConfigSource::File);
            }
            if let Some(quota) = file_config.quota_bytes {
                config.quota_bytes = ConfigValue::new(Some(quota), ConfigSource::File);
            }
            if let Some(sync) = file_config.sync {
                config.sync = sync;
            }
            if let Some(download) = file_config.download {
                config.download = download;
            }
            if let Some(backup) = file_config.backup {
                config.backup = backup;
            }
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Environment variable overrides. `lookup` is injected so tests do not
    /// touch the process environment.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("HIKMA_DATA_DIR") {
            self.data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Some(parent_id) = lookup("HIKMA_PARENT_ID") {
            self.parent_id = ConfigValue::new(Some(parent_id), ConfigSource::Environment);
        }
        if let Some(quota) = lookup("HIKMA_QUOTA_BYTES") {
            let bytes = quota
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue("HIKMA_QUOTA_BYTES", quota.clone()))?;
            self.quota_bytes = ConfigValue::new(Some(bytes), ConfigSource::Environment);
        }
        // Sync env var overrides
        if let Some(url) = lookup("HIKMA_SYNC_URL") {
            self.sync.server_url = Some(url);
        }
        if let Some(token) = lookup("HIKMA_SYNC_TOKEN") {
            self.sync.api_token = Some(token);
        }
        Ok(())
    }

    /// SQLite store file inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.value.join("hikma.db")
    }

    /// The single backup slot.
    pub fn backup_path(&self) -> PathBuf {
        self.data_dir
            .value
            .join("backup")
            .join("progress-backup.json")
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/hikma/
    /// - macOS: ~/Library/Application Support/hikma/
    /// - Windows: %APPDATA%/hikma/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hikma")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/hikma/
    /// - macOS: ~/Library/Application Support/hikma/
    /// - Windows: %APPDATA%/hikma/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hikma")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
    MissingParentId,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
            ConfigError::MissingParentId => write!(
                f,
                "No parent_id configured. Set parent_id in the config file or HIKMA_PARENT_ID."
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config.database_path().to_string_lossy().ends_with("hikma.db"));
        assert_eq!(config.data_dir.source, ConfigSource::Default);
        assert_eq!(config.download.edition, "en.sahih");
        assert_eq!(config.download.delays_ms.story, Duration::from_secs(2));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "data_dir: /custom/hikma").unwrap();
        writeln!(file, "parent_id: family-1").unwrap();
        writeln!(file, "quota_bytes: 1048576").unwrap();
        writeln!(file, "sync:").unwrap();
        writeln!(file, "  server_url: http://localhost:8080").unwrap();
        writeln!(file, "download:").unwrap();
        writeln!(file, "  reciter: ar.husary").unwrap();
        writeln!(file, "  audio_bitrate: 64").unwrap();
        writeln!(file, "  delays_ms:").unwrap();
        writeln!(file, "    audio: 250").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.data_dir.value, PathBuf::from("/custom/hikma"));
        assert_eq!(config.data_dir.source, ConfigSource::File);
        assert_eq!(config.parent_id.value.as_deref(), Some("family-1"));
        assert_eq!(config.quota_bytes.value, Some(1048576));
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(config.sync.timeout_secs, 15);
        assert!(!config.sync.is_configured());
        assert_eq!(config.download.reciter, "ar.husary");
        assert_eq!(config.download.sources.audio_bitrate, 64);
        assert_eq!(config.download.delays_ms.audio, Duration::from_millis(250));
        assert_eq!(config.download.delays_ms.surah, Duration::from_millis(300));
        assert_eq!(
            config.backup_path(),
            PathBuf::from("/custom/hikma/backup/progress-backup.json")
        );
    }

    #[test]
    fn test_relative_data_dir_resolves_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "data_dir: data\n").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.data_dir.value, temp_dir.path().join("data"));
    }

    #[test]
    fn test_env_overrides() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::write(&config_path, "parent_id: fromfile\n").unwrap();

        let mut config = Config::load(Some(config_path)).unwrap();
        let env: HashMap<&str, &str> = [
            ("HIKMA_PARENT_ID", "fromenv"),
            ("HIKMA_SYNC_URL", "http://sync.example.com"),
            ("HIKMA_SYNC_TOKEN", "token"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.parent_id.value.as_deref(), Some("fromenv"));
        assert_eq!(config.parent_id.source, ConfigSource::Environment);
        assert!(config.sync.is_configured());
    }

    #[test]
    fn test_invalid_quota_env() {
        let temp_dir = tempdir().unwrap();
        let mut config = Config::load(Some(temp_dir.path().join("none.yaml"))).unwrap();
        let err = config
            .apply_env(|name| (name == "HIKMA_QUOTA_BYTES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("HIKMA_QUOTA_BYTES"));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
