//! Reply read-out: VOICEVOX synthesis with a browser speech fallback.

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

lazy_static! {
    static ref TAG: Regex = Regex::new(r"<[^>]*>").expect("tag pattern");
    static ref FENCED: Regex = Regex::new(r"(?s)```.*?```").expect("fence pattern");
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("VOICEVOXが起動していません ({0})")]
    Unavailable(String),
    #[error("speech request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("synthesis failed with status {0}")]
    Synthesis(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    Off,
    #[default]
    Voicevox,
    Browser,
}

/// Character presets and the VOICEVOX speaker each one uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Character {
    Nike,
    Friendly,
    Professional,
}

impl Character {
    pub fn display_name(self) -> &'static str {
        match self {
            Character::Nike => "ニケちゃん",
            Character::Friendly => "フレンドリー",
            Character::Professional => "プロフェッショナル",
        }
    }

    pub fn speaker(self) -> u32 {
        match self {
            Character::Nike => 3,
            Character::Friendly => 1,
            Character::Professional => 8,
        }
    }
}

impl FromStr for Character {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nike" => Ok(Character::Nike),
            "friendly" => Ok(Character::Friendly),
            "professional" => Ok(Character::Professional),
            other => Err(format!("unknown character: {}", other)),
        }
    }
}

/// Parameters for the page's own speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserSpeech {
    pub text: String,
    pub lang: &'static str,
    pub rate: f32,
    pub pitch: f32,
}

impl BrowserSpeech {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: "ja-JP",
            rate: 1.0,
            pitch: 1.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechOutcome {
    Silent,
    Audio(Vec<u8>),
    Browser(BrowserSpeech),
}

/// Text suitable for read-out: markup tags and fenced blocks removed.
pub fn clean_for_speech(text: &str) -> String {
    let without_tags = TAG.replace_all(text, "");
    FENCED.replace_all(&without_tags, "").trim().to_string()
}

#[derive(Debug, Clone)]
pub struct VoicevoxClient {
    client: Client,
    base_url: String,
}

impl VoicevoxClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Two-step synthesis: build an audio query, then render it to audio.
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn synthesize(&self, text: &str, speaker: u32) -> Result<Vec<u8>, SpeechError> {
        let speaker = speaker.to_string();
        let query_response = self
            .client
            .post(format!("{}/audio_query", self.base_url))
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .send()
            .await
            .map_err(|e| SpeechError::Unavailable(e.to_string()))?;

        if !query_response.status().is_success() {
            return Err(SpeechError::Unavailable(format!(
                "audio_query returned {}",
                query_response.status()
            )));
        }
        let audio_query = query_response.json::<serde_json::Value>().await?;

        let synthesis = self
            .client
            .post(format!("{}/synthesis", self.base_url))
            .query(&[("speaker", speaker.as_str())])
            .json(&audio_query)
            .send()
            .await?;
        if !synthesis.status().is_success() {
            return Err(SpeechError::Synthesis(synthesis.status().as_u16()));
        }
        let audio = synthesis.bytes().await?;
        debug!(bytes = audio.len(), "VOICEVOX audio synthesized");
        Ok(audio.to_vec())
    }

    /// Read `text` out in the requested mode. Any VOICEVOX failure falls back
    /// to browser speech.
    pub async fn speak(&self, mode: VoiceMode, text: &str, speaker: u32) -> SpeechOutcome {
        let text = clean_for_speech(text);
        if text.is_empty() {
            return SpeechOutcome::Silent;
        }
        match mode {
            VoiceMode::Off => SpeechOutcome::Silent,
            VoiceMode::Browser => SpeechOutcome::Browser(BrowserSpeech::new(text)),
            VoiceMode::Voicevox => match self.synthesize(&text, speaker).await {
                Ok(audio) => SpeechOutcome::Audio(audio),
                Err(e) => {
                    warn!(error = %e, "VOICEVOX failed, falling back to browser speech");
                    info!("Using browser speech synthesis");
                    SpeechOutcome::Browser(BrowserSpeech::new(text))
                }
            },
        }
    }
}
