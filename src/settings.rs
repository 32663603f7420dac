//! Local key/value settings (API keys and the VOICEVOX address), stored as a
//! small JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::constants;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("ChatGPT APIキーは必須です")]
    MissingOpenAiKey,
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openai_api_key: String,
    pub pexels_api_key: String,
    pub voicevox_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: constants::OPENAI_API_KEY.clone(),
            pexels_api_key: constants::PEXELS_API_KEY.clone(),
            voicevox_url: constants::VOICEVOX_URL.clone(),
        }
    }
}

impl Settings {
    fn normalized(mut self) -> Self {
        self.openai_api_key = self.openai_api_key.trim().to_string();
        self.pexels_api_key = self.pexels_api_key.trim().to_string();
        self.voicevox_url = self.voicevox_url.trim().to_string();
        if self.voicevox_url.is_empty() {
            self.voicevox_url = constants::VOICEVOX_URL.clone();
        }
        self
    }
}

/// Partial change from the settings page. Keys are never sent back to the
/// page, so a missing or blank key keeps the stored one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub openai_api_key: Option<String>,
    pub pexels_api_key: Option<String>,
    pub voicevox_url: Option<String>,
}

impl SettingsUpdate {
    fn apply(self, settings: &mut Settings) {
        let given = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        if let Some(key) = given(self.openai_api_key) {
            settings.openai_api_key = key;
        }
        if let Some(key) = given(self.pexels_api_key) {
            settings.pexels_api_key = key;
        }
        if let Some(url) = given(self.voicevox_url) {
            settings.voicevox_url = url;
        }
    }
}

/// Which stored value a `set` command changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    OpenAiKey,
    PexelsKey,
    VoicevoxUrl,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Self {
        Self::new(constants::SETTINGS_PATH.as_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved settings, or defaults when nothing has been saved yet.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let settings: Settings = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(settings.normalized())
    }

    pub fn save(&self, settings: Settings) -> Result<Settings, SettingsError> {
        let settings = settings.normalized();
        if settings.openai_api_key.is_empty() {
            return Err(SettingsError::MissingOpenAiKey);
        }
        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(&settings).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(io_err)?;
        info!(path = %self.path.display(), "Settings saved");
        Ok(settings)
    }

    /// Merge a partial change over the stored settings.
    pub fn update(&self, update: SettingsUpdate) -> Result<Settings, SettingsError> {
        let mut settings = self.load()?;
        update.apply(&mut settings);
        self.save(settings)
    }

    /// Change one value, keeping the others.
    pub fn set(&self, key: SettingKey, value: &str) -> Result<Settings, SettingsError> {
        let mut settings = self.load()?;
        match key {
            SettingKey::OpenAiKey => settings.openai_api_key = value.to_string(),
            SettingKey::PexelsKey => settings.pexels_api_key = value.to_string(),
            SettingKey::VoicevoxUrl => settings.voicevox_url = value.to_string(),
        }
        self.save(settings)
    }
}
