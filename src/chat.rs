// Conversation state for the web UI and the interactive CLI chat.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use tracing::info;

use crate::llm_interaction::{ChatClient, ChatError, ChatMessage};
use crate::settings::SettingsStore;

pub const SYSTEM_PROMPT: &str = "あなたは優秀な家庭教師であり営業コンサルタントの「ニケちゃん」です。
複雑な内容を分かりやすく説明し、視覚的な図解を含めて答えてください。

【図解の使い方】
- フローチャート: ```mermaid で囲む
- グラフ: ```chart で囲む（type: / labels: [..] / data: [..] / title: の各行で記述）
- 必ず見やすい図解を含める

【回答のルール】
- 親しみやすく、分かりやすい説明
- 適切な絵文字を使用
- 図解は必ず正しい構文で記述";

/// Turn history sent with every request. A user turn is only recorded
/// together with the reply it produced.
#[derive(Debug, Default, Clone)]
pub struct Conversation {
    history: Vec<ChatMessage>,
}

impl Conversation {
    /// Messages for a request carrying `turn`: system prompt, history, turn.
    pub fn request(&self, turn: &ChatMessage) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend(self.history.iter().cloned());
        messages.push(turn.clone());
        messages
    }

    pub fn commit(&mut self, turn: ChatMessage, reply: &str) {
        self.history.push(turn);
        self.history.push(ChatMessage::assistant(reply));
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// One complete exchange; history is untouched when the call fails.
    pub async fn send(
        &mut self,
        client: &ChatClient,
        api_key: &str,
        turn: ChatMessage,
    ) -> Result<String, ChatError> {
        let reply = client.complete(api_key, &self.request(&turn)).await?;
        self.commit(turn, &reply);
        Ok(reply)
    }
}

/// Line-oriented chat on stdin/stdout until EOF or `/exit`.
pub async fn run_interactive_chat(client: &ChatClient, store: &SettingsStore) -> Result<()> {
    let settings = store.load().context("Failed to load settings")?;
    if settings.openai_api_key.is_empty() {
        anyhow::bail!("OpenAI API key is not set. Run `chatvrm set openai-key <KEY>` first.");
    }

    info!("Starting interactive chat...");
    let mut conversation = Conversation::default();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "/exit" {
            break;
        }

        match conversation
            .send(client, &settings.openai_api_key, ChatMessage::user(message))
            .await
        {
            Ok(reply) => println!("{}\n", reply),
            Err(e) => println!("⚠️ エラーが発生しました: {}\n", e),
        }
    }
    info!("Chat session finished.");
    Ok(())
}
