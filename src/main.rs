use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use tracing::{error, info};

use chatvrm::chat;
use chatvrm::llm_interaction::ChatClient;
use chatvrm::render::{extractor::IdAllocator, render_reply};
use chatvrm::settings::{SettingKey, SettingsStore};
use chatvrm::web_server::{self, ServerConfig};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the chat widget web server.
    Serve {
        #[arg(long, default_value_t = 8080, env = "CHATVRM_PORT", help = "Port for the web server.")]
        port: u16,
    },
    /// Chat with the model from the terminal.
    Chat,
    /// Render a model reply (file or stdin) to HTML.
    Render {
        #[arg(help = "File holding the reply text; reads stdin when omitted.")]
        file: Option<PathBuf>,
    },
    /// Store a setting.
    Set {
        #[command(subcommand)]
        target: SetCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum SetCommands {
    /// OpenAI API key used for chat completions.
    OpenaiKey { value: String },
    /// Pexels API key used for related photos.
    PexelsKey { value: String },
    /// Base URL of the VOICEVOX engine.
    VoicevoxUrl { value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,chatvrm=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("ChatVRM starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Serve { port } => {
            let config = ServerConfig::from_env(port);
            let mut server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(config).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !server_handle.is_finished() {
                info!("Aborting web server task...");
                server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            let client = ChatClient::from_env(reqwest::Client::new());
            chat::run_interactive_chat(&client, &SettingsStore::from_env())
                .await
                .context("Chat session failed")?;
        }
        Commands::Render { file } => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut raw = String::new();
                    std::io::stdin()
                        .read_to_string(&mut raw)
                        .context("Failed to read reply from stdin")?;
                    raw
                }
            };
            let rendered = render_reply(&raw, &mut IdAllocator::default());
            println!("{}", rendered.html);
        }
        Commands::Set { target } => {
            let (key, value) = match target {
                SetCommands::OpenaiKey { value } => (SettingKey::OpenAiKey, value),
                SetCommands::PexelsKey { value } => (SettingKey::PexelsKey, value),
                SetCommands::VoicevoxUrl { value } => (SettingKey::VoicevoxUrl, value),
            };
            let store = SettingsStore::from_env();
            store
                .set(key, &value)
                .with_context(|| format!("Failed to update {}", store.path().display()))?;
            println!("Saved {:?} to {}", key, store.path().display());
        }
    }

    Ok(())
}
