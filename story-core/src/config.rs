use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{StoryError, StoryResult};
use crate::illustration::MAX_ILLUSTRATION_BYTES;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Client preferences injected into the story components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub dark_mode: bool,
    pub auto_save: bool,
    pub dev_mode: bool,
    pub locale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub media_base_url: Option<String>,
    pub page_size: usize,
    pub request_timeout_seconds: u64,
    pub retry_attempts: u8,
    pub retry_backoff_ms: u64,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            auto_save: true,
            dev_mode: false,
            locale: "en".to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            media_base_url: None,
            page_size: 20,
            request_timeout_seconds: 10,
            retry_attempts: 3,
            retry_backoff_ms: 250,
            max_upload_bytes: MAX_ILLUSTRATION_BYTES,
        }
    }
}

impl AppConfig {
    /// `<config dir>/storyfeed/config.json`
    pub fn config_file_path() -> StoryResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            StoryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no configuration directory on this platform",
            ))
        })?;
        Ok(config_dir.join("storyfeed").join("config.json"))
    }

    /// Loads the user's configuration, falling back to defaults (and writing
    /// them out) when the file is missing or unreadable.
    pub fn load() -> Self {
        match Self::config_file_path() {
            Ok(path) => Self::load_or_init(&path),
            Err(e) => {
                warn!(error = %e, "no config location; using defaults");
                Self::default()
            }
        }
    }

    pub fn load_or_init(path: &Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "could not load config; using defaults");
                let config = Self::default();
                if let Err(save_err) = config.save_to(path) {
                    warn!(error = %save_err, "could not write default config");
                }
                config
            }
        }
    }

    pub fn from_file(path: &Path) -> StoryResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_to(&self, path: &Path) -> StoryResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn save(&self) -> StoryResult<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Directory for the on-disk read cache.
    pub fn cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("storyfeed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"settings":{"darkMode":true},"client":{"page_size":5}}"#)
                .unwrap();
        assert!(config.settings.dark_mode);
        assert!(config.settings.auto_save);
        assert_eq!(config.settings.locale, "en");
        assert_eq!(config.client.page_size, 5);
        assert_eq!(config.client.max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn corrupt_file_falls_back_and_rewrites_defaults() {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "storyfeed_config_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let path = dir.join("config.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "{ nope").unwrap();

        let config = AppConfig::load_or_init(&path);
        assert_eq!(config, AppConfig::default());
        assert_eq!(AppConfig::from_file(&path).unwrap(), AppConfig::default());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
