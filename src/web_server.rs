use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{broadcast, Mutex};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::chat::Conversation;
use crate::constants;
use crate::llm_interaction::{ChatClient, ChatError, ChatMessage};
use crate::media::{MediaClient, Photo};
use crate::render::chart::ChartJsBackend;
use crate::render::diagram::{ClientSideLayout, DiagramLayout, DiagramRenderer, MermaidInkLayout};
use crate::render::display::{ContainerUpdate, MessageId, MessageSnapshot};
use crate::render::{BlockKind, ChartDraw, RenderSession};
use crate::settings::{Settings, SettingsError, SettingsStore, SettingsUpdate};
use crate::speech::{Character, SpeechOutcome, VoiceMode, VoicevoxClient};

// Messages pushed to every connected page over the WebSocket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastMessage {
    fn container_updated(update: &ContainerUpdate) -> Self {
        Self {
            message_type: "ContainerUpdated".to_string(),
            payload: serde_json::json!({ "id": update.id, "html": update.html }),
        }
    }
}

/// Everything the server needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub templates_dir: String,
    pub static_dir: String,
    pub settings_path: String,
    pub openai_url: String,
    pub chat_model: String,
    pub pexels_url: String,
    pub diagram_layout: String,
    pub mermaid_ink_url: String,
}

impl ServerConfig {
    pub fn from_env(port: u16) -> Self {
        Self {
            port,
            templates_dir: constants::TEMPLATES_DIR.clone(),
            static_dir: constants::STATIC_DIR.clone(),
            settings_path: constants::SETTINGS_PATH.clone(),
            openai_url: constants::OPENAI_API_URL.clone(),
            chat_model: constants::CHAT_MODEL.clone(),
            pexels_url: constants::PEXELS_API_URL.clone(),
            diagram_layout: constants::DIAGRAM_RENDERER.clone(),
            mermaid_ink_url: constants::MERMAID_INK_URL.clone(),
        }
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    session: Arc<Mutex<RenderSession>>,
    conversation: Arc<Mutex<Conversation>>,
    settings: SettingsStore,
    chat: ChatClient,
    media: MediaClient,
    http: Client,
    diagrams: Arc<dyn DiagramLayout>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let templates = create_minijinja_env(&config.templates_dir);
        let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
        let http = Client::builder()
            .user_agent(concat!("chatvrm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let diagrams: Arc<dyn DiagramLayout> = match config.diagram_layout.as_str() {
            "client" => Arc::new(ClientSideLayout),
            "mermaid-ink" => Arc::new(MermaidInkLayout::new(http.clone(), &config.mermaid_ink_url)),
            other => anyhow::bail!("Unknown diagram renderer '{}' (expected client or mermaid-ink)", other),
        };
        info!(layout = diagrams.name(), "Diagram layout selected");

        Ok(Self {
            templates: Arc::new(templates),
            broadcast_tx,
            session: Arc::new(Mutex::new(RenderSession::new(Box::new(ChartJsBackend)))),
            conversation: Arc::new(Mutex::new(Conversation::default())),
            settings: SettingsStore::new(&config.settings_path),
            chat: ChatClient::new(http.clone(), &config.openai_url, &config.chat_model),
            media: MediaClient::new(http.clone(), &config.pexels_url),
            http,
            diagrams,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }

    fn publish(&self, msg: BroadcastMessage) {
        if self.broadcast_tx.send(msg).is_err() {
            debug!("No WebSocket clients to receive update");
        }
    }

    fn load_settings(&self) -> Result<Settings, ApiError> {
        self.settings.load().map_err(|e| {
            error!("Failed to load settings: {}", e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "settings_unavailable", e.to_string())
        })
    }
}

/// JSON error body: `{"error": code, "message": text}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: &str) -> AutoReloader {
    let dir = templates_dir.to_string();
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&dir));
        notifier.watch_path(std::path::Path::new(&dir), true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, Html<String>> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => constants::APP_NAME,
                    version => env!("CARGO_PKG_VERSION"),
                    character => Character::Nike.display_name(),
                };
                tmpl.render(context)
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            Html(format!("Internal Server Error: {}", e))
        })
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Uploaded image as a data URL.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message_id: MessageId,
    pub html: String,
    pub diagrams: Vec<String>,
    pub charts: Vec<String>,
    pub speech_text: String,
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() && request.image.is_none() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "⚠️ メッセージを入力してください",
        ));
    }

    let settings = state.load_settings()?;
    let turn = match request.image {
        Some(image) => ChatMessage::user_with_image(message, image),
        None => ChatMessage::user(message),
    };

    // The conversation lock is released while the remote call is in flight.
    let messages = state.conversation.lock().await.request(&turn);
    let reply = match state.chat.complete(&settings.openai_api_key, &messages).await {
        Ok(reply) => reply,
        Err(ChatError::MissingApiKey) => {
            return Err(ApiError::new(
                StatusCode::PRECONDITION_FAILED,
                "missing_api_key",
                "⚠️ OpenAI APIキーを設定してください！右上の「⚙️ 設定」ボタンから設定できます。",
            ))
        }
        Err(e) => {
            error!("Chat request failed: {}", e);
            return Err(ApiError::new(
                StatusCode::BAD_GATEWAY,
                "chat_failed",
                format!("⚠️ エラーが発生しました: {}", e),
            ));
        }
    };
    state.conversation.lock().await.commit(turn, &reply);

    let (message_id, rendered, nodes) = state.session.lock().await.present(&reply);
    if !nodes.is_empty() {
        let state = state.clone();
        tokio::spawn(async move {
            let updates = DiagramRenderer::render(state.diagrams.as_ref(), &nodes).await;
            let applied = state.session.lock().await.apply_updates(&updates);
            for update in &applied {
                state.publish(BroadcastMessage::container_updated(update));
            }
        });
    }

    Ok(Json(ChatResponse {
        message_id,
        diagrams: rendered.ids_of(BlockKind::Diagram),
        charts: rendered.ids_of(BlockKind::Chart),
        html: rendered.html,
        speech_text: crate::speech::clean_for_speech(&reply),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AttachRequest {
    pub width: u32,
    pub height: u32,
}

async fn chart_attached_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AttachRequest>,
) -> Response {
    let outcome = state
        .session
        .lock()
        .await
        .on_container_attached(&id, request.width, request.height);
    match outcome {
        ChartDraw::Drawn(config) => Json(config).into_response(),
        ChartDraw::Missing => StatusCode::NO_CONTENT.into_response(),
        ChartDraw::Failed(update) => {
            state.publish(BroadcastMessage::container_updated(&update));
            (StatusCode::UNPROCESSABLE_ENTITY, Json(update)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    #[serde(default)]
    pub mode: VoiceMode,
    #[serde(default)]
    pub speaker: Option<u32>,
    #[serde(default)]
    pub character: Option<Character>,
}

async fn speech_handler(
    State(state): State<AppState>,
    Json(request): Json<SpeechRequest>,
) -> Result<Response, ApiError> {
    let settings = state.load_settings()?;
    let speaker = request
        .speaker
        .or(request.character.map(Character::speaker))
        .unwrap_or(constants::DEFAULT_SPEAKER);
    let voicevox = VoicevoxClient::new(state.http.clone(), &settings.voicevox_url);

    let response = match voicevox.speak(request.mode, &request.text, speaker).await {
        SpeechOutcome::Silent => StatusCode::NO_CONTENT.into_response(),
        SpeechOutcome::Audio(audio) => ([(header::CONTENT_TYPE, "audio/wav")], audio).into_response(),
        SpeechOutcome::Browser(speech) => {
            let status = if request.mode == VoiceMode::Voicevox {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (
                status,
                Json(serde_json::json!({ "fallback": "browser", "speech": speech })),
            )
                .into_response()
        }
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub photos: Vec<Photo>,
}

async fn media_handler(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Result<Json<MediaResponse>, ApiError> {
    let settings = state.load_settings()?;
    if settings.pexels_api_key.is_empty() {
        return Ok(Json(MediaResponse { photos: Vec::new() }));
    }
    let photos = match state.media.related(&settings.pexels_api_key, &query.query).await {
        Ok(photos) => photos,
        Err(e) => {
            warn!("Media search failed: {}", e);
            Vec::new()
        }
    };
    Ok(Json(MediaResponse { photos }))
}

/// Settings as shown to the page; keys are never echoed back.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsView {
    pub has_openai_key: bool,
    pub has_pexels_key: bool,
    pub voicevox_url: String,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        Self {
            has_openai_key: !settings.openai_api_key.is_empty(),
            has_pexels_key: !settings.pexels_api_key.is_empty(),
            voicevox_url: settings.voicevox_url.clone(),
        }
    }
}

async fn get_settings_handler(State(state): State<AppState>) -> Result<Json<SettingsView>, ApiError> {
    let settings = state.load_settings()?;
    Ok(Json(SettingsView::from(&settings)))
}

async fn put_settings_handler(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsView>, ApiError> {
    match state.settings.update(update) {
        Ok(saved) => Ok(Json(SettingsView::from(&saved))),
        Err(e @ SettingsError::MissingOpenAiKey) => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "missing_api_key",
            format!("⚠️ {}", e),
        )),
        Err(e) => {
            error!("Failed to save settings: {}", e);
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "settings_unavailable",
                e.to_string(),
            ))
        }
    }
}

async fn list_messages_handler(State(state): State<AppState>) -> Json<Vec<MessageSnapshot>> {
    Json(state.session.lock().await.board().snapshot())
}

async fn clear_messages_handler(State(state): State<AppState>) -> StatusCode {
    state.conversation.lock().await.clear();
    state.session.lock().await.clear();
    info!("Conversation cleared");
    StatusCode::NO_CONTENT
}

// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Forward broadcasts to one page until it disconnects.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut broadcast_rx = state.subscribe();

    let welcome_msg = BroadcastMessage {
        message_type: "Info".to_string(),
        payload: serde_json::json!({"message": format!("Connected to {}", constants::APP_NAME)}),
    };
    if let Ok(json_msg) = serde_json::to_string(&welcome_msg) {
        if socket.send(Message::Text(json_msg)).await.is_err() {
            warn!("Failed to send welcome message to new WebSocket client");
            return;
        }
    }

    loop {
        tokio::select! {
            Ok(msg) = broadcast_rx.recv() => {
                match serde_json::to_string(&msg) {
                    Ok(json_msg) => {
                        if socket.send(Message::Text(json_msg)).await.is_err() {
                            warn!("WebSocket client disconnected or send error. Closing connection.");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize broadcast message: {}", e),
                }
            }

            Some(Ok(msg)) = socket.recv() => {
                match msg {
                    Message::Text(text) => debug!("Ignoring text message from client: {}", text),
                    Message::Binary(_) => warn!("Received unexpected binary message from client"),
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        info!("Client requested WebSocket close");
                        break;
                    }
                }
            }

            else => {
                info!("WebSocket client disconnected");
                break;
            }
        }
    }
    info!("WebSocket connection closed");
}

pub fn build_router(state: AppState, static_dir: &str) -> Router {
    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(|_| async {
        Ok::<_, std::convert::Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
    }));

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/charts/:id/attached", post(chart_attached_handler))
        .route("/api/speech", post(speech_handler))
        .route("/api/media", get(media_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .route(
            "/api/messages",
            get(list_messages_handler).delete(clear_messages_handler),
        )
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config).context("Failed to initialize application state")?;
    let app = build_router(state, &config.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
