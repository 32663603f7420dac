// Runtime defaults, overridable from the environment (or a .env file).

use std::env;

pub const APP_NAME: &str = "Nike ChatVRM Enhanced";
pub const DEFAULT_SPEAKER: u32 = 1;
pub const MEDIA_PER_PAGE: u32 = 4;
pub const CHAT_TEMPERATURE: f32 = 0.7;
pub const CHAT_MAX_TOKENS: u32 = 2000;

lazy_static::lazy_static! {
    pub static ref OPENAI_API_URL: String = env::var("OPENAI_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    pub static ref CHAT_MODEL: String = env::var("CHATVRM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4".to_string());
    pub static ref PEXELS_API_URL: String = env::var("PEXELS_API_URL").unwrap_or_else(|_| "https://api.pexels.com/v1".to_string());
    pub static ref VOICEVOX_URL: String = env::var("VOICEVOX_URL").unwrap_or_else(|_| "http://localhost:50021".to_string());
    // Keys from the environment only seed settings that have not been saved yet.
    pub static ref OPENAI_API_KEY: String = env::var("OPENAI_API_KEY").unwrap_or_default();
    pub static ref PEXELS_API_KEY: String = env::var("PEXELS_API_KEY").unwrap_or_default();
    pub static ref SETTINGS_PATH: String = env::var("CHATVRM_SETTINGS").unwrap_or_else(|_| ".chatvrm/settings.json".to_string());
    pub static ref TEMPLATES_DIR: String = env::var("CHATVRM_TEMPLATES_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("CHATVRM_STATIC_DIR").unwrap_or_else(|_| "static".to_string());
    pub static ref DIAGRAM_RENDERER: String = env::var("CHATVRM_DIAGRAMS").unwrap_or_else(|_| "client".to_string());
    pub static ref MERMAID_INK_URL: String = env::var("MERMAID_INK_URL").unwrap_or_else(|_| "https://mermaid.ink".to_string());
}
