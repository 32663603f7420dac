//! Related-photo lookup against a Pexels-compatible search API.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::constants;

pub const DEFAULT_ALT_TEXT: &str = "関連画像";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("media search returned {status}")]
    Status { status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Photo {
    pub preview_url: String,
    pub alt_text: String,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    photos: Vec<PexelsPhoto>,
}

#[derive(Deserialize, Debug)]
struct PexelsPhoto {
    src: PhotoSources,
    #[serde(default)]
    alt: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PhotoSources {
    medium: String,
}

/// Search term for a user message: its first word longer than one character.
pub fn search_keyword(message: &str) -> &str {
    message
        .split(|c: char| c == '、' || c == '。' || c.is_whitespace())
        .find(|word| word.chars().count() > 1)
        .unwrap_or(message)
}

#[derive(Debug, Clone)]
pub struct MediaClient {
    client: Client,
    base_url: String,
}

impl MediaClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[instrument(skip(self, api_key))]
    pub async fn search(&self, api_key: &str, query: &str) -> Result<Vec<Photo>, MediaError> {
        let per_page = constants::MEDIA_PER_PAGE.to_string();
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .header("Authorization", api_key)
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("locale", "ja-JP"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!(%status, "Media search failed");
            return Err(MediaError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.json::<SearchResponse>().await?;
        let photos: Vec<Photo> = body
            .photos
            .into_iter()
            .map(|p| Photo {
                preview_url: p.src.medium,
                alt_text: p
                    .alt
                    .filter(|alt| !alt.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_ALT_TEXT.to_string()),
            })
            .collect();
        debug!(count = photos.len(), "Media search finished");
        Ok(photos)
    }

    /// Photos related to a user message, searched by its leading keyword.
    pub async fn related(&self, api_key: &str, message: &str) -> Result<Vec<Photo>, MediaError> {
        self.search(api_key, search_keyword(message)).await
    }
}
