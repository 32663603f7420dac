pub mod chat;
pub mod constants;
pub mod llm_interaction;
pub mod media;
pub mod render;
pub mod settings;
pub mod speech;
pub mod web_server;

pub use render::{render_reply, RenderSession, RenderedMessage};
