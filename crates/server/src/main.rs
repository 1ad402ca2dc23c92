//! Roundtable Server
//!
//! Axum server and CLI over the meeting room core. The HTTP surface drives
//! the pipeline, streams its events as SSE, serves one-on-one chats and
//! exports; the CLI runs the same meeting in a terminal.

mod api;
mod cli;
mod config;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use clap::{Parser, Subcommand};
use roundtable_core::meeting::Canceller;
use roundtable_core::{
    Agent, AgentRegistry, AgentTransport, ConversationStore, DirectChat, HttpTransport,
    MeetingConfig, MeetingEvent, MeetingSnapshot, RoundtableDb, SqliteConversationStore,
    TurnOrchestrator,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, watch, Mutex, RwLock},
};
use tracing_subscriber::EnvFilter;
use utoipa::{OpenApi, ToSchema};

use api::ApiResponse;
use config::PersistedConfig;

/// Application state
pub struct AppState {
    /// Held for the whole of a send or summary; `try_lock` failing means busy
    meeting: Arc<Mutex<TurnOrchestrator>>,
    snapshots: watch::Receiver<MeetingSnapshot>,
    canceller: Canceller,
    event_tx: broadcast::Sender<MeetingEvent>,
    /// Shared so sends to the same agent queue on its session lock
    chat: RwLock<DirectChat>,
    config: RwLock<MeetingConfig>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    async fn registry(&self) -> AgentRegistry {
        AgentRegistry::new(&self.config.read().await.api_base)
    }
}

// === API Types ===

#[derive(Serialize, ToSchema)]
struct AgentsResponse {
    #[schema(value_type = Vec<Object>)]
    agents: Vec<Agent>,
}

#[derive(Serialize, ToSchema)]
struct ConfigResponse {
    /// Values saved in `.roundtable/config.json`
    config: PersistedConfig,
    /// What the meeting runs with after layering
    #[schema(value_type = Object)]
    effective: MeetingConfig,
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Roundtable - turn-taking meeting room for AI agents")]
struct Args {
    /// Inference backend base URL (overrides config file and environment)
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run a meeting on a topic in the terminal
    Run {
        /// The topic to discuss
        topic: String,
        /// Pause after every agent for feedback
        #[arg(short, long)]
        interactive: bool,
    },
    /// Export the stored meeting record
    Export {
        #[arg(short, long, value_enum, default_value = "both")]
        format: cli::FormatArg,
    },
    /// Clear the stored meeting
    Clear {
        /// Also clear every one-on-one chat
        #[arg(long)]
        all: bool,
    },
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Roundtable API",
        version = "0.1.0",
        description = "Turn-taking meeting room: analyst, architect, developer and tester speak in order"
    ),
    paths(
        api::meeting::get_meeting,
        api::meeting::send_message,
        api::meeting::request_summary,
        api::meeting::cancel_turn,
        api::meeting::clear_meeting,
        api::meeting::export_meeting,
        api::meeting::events,
        api::chat::open_chat,
        api::chat::send_chat,
        api::chat::clear_chat,
        list_agents,
        get_config,
        update_config
    ),
    components(
        schemas(
            ApiResponse,
            api::meeting::MeetingResponse,
            api::meeting::SendRequest,
            api::meeting::ExportRequest,
            api::meeting::ExportResponse,
            api::chat::ChatResponse,
            AgentsResponse,
            ConfigResponse,
            PersistedConfig
        )
    ),
    tags(
        (name = "meeting", description = "Pipeline meeting"),
        (name = "chat", description = "One-on-one chat with a single agent"),
        (name = "agents", description = "Agent table"),
        (name = "config", description = "Configuration management")
    )
)]
struct ApiDoc;

/// The agents in pipeline order
#[utoipa::path(
    get,
    path = "/api/v1/agents",
    tag = "agents",
    responses(
        (status = 200, description = "Agent table", body = AgentsResponse)
    )
)]
async fn list_agents(State(state): State<SharedState>) -> Json<AgentsResponse> {
    Json(AgentsResponse {
        agents: state.registry().await.pipeline().to_vec(),
    })
}

// === Config Handlers ===

/// Get current configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Saved and effective configuration", body = ConfigResponse)
    )
)]
async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        config: PersistedConfig::load().await,
        effective: state.config.read().await.clone(),
    })
}

/// Update configuration (partial merge). Takes effect from the next turn.
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = PersistedConfig,
    responses(
        (status = 200, description = "Updated configuration", body = ConfigResponse)
    )
)]
async fn update_config(
    State(state): State<SharedState>,
    Json(updates): Json<PersistedConfig>,
) -> Json<ConfigResponse> {
    let mut saved = PersistedConfig::load().await;
    saved.merge(updates.clone());

    if let Err(e) = saved.save().await {
        tracing::error!(error = %e, "Failed to save config");
    }

    let effective = {
        let mut current = state.config.write().await;
        *current = updates.apply(current.clone());
        current.clone()
    };
    state.chat.write().await.set_config(effective.clone());
    tracing::info!(api_base = %effective.api_base, interactive = effective.interactive, "Config updated");

    Json(ConfigResponse {
        config: saved,
        effective,
    })
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

fn open_store() -> anyhow::Result<Arc<dyn ConversationStore>> {
    let db = RoundtableDb::open()?;
    Ok(Arc::new(SqliteConversationStore::new(&db)))
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .nest("/api/v1/meeting", api::meeting::routes())
        .nest("/api/v1/chat", api::chat::routes())
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/config", get(get_config).patch(update_config))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

pub async fn run_server(config: MeetingConfig, port: u16) -> anyhow::Result<()> {
    let store = open_store()?;
    let transport: Arc<dyn AgentTransport> = Arc::new(HttpTransport::new(&config)?);

    let (event_tx, _) = broadcast::channel::<MeetingEvent>(256);
    let (fragment_tx, mut fragment_rx) = mpsc::channel::<MeetingEvent>(256);

    let meeting = TurnOrchestrator::new(
        AgentRegistry::new(&config.api_base),
        transport.clone(),
        store.clone(),
        config.clone(),
    )?
    .with_event_channel(fragment_tx.clone());

    let chat = DirectChat::new(
        AgentRegistry::new(&config.api_base),
        transport,
        store,
        config.clone(),
    )
    .with_event_channel(fragment_tx);

    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = fragment_rx.recv().await {
            // no subscribers is fine
            let _ = forward_tx.send(event);
        }
    });

    let state: SharedState = Arc::new(AppState {
        snapshots: meeting.subscribe(),
        canceller: meeting.canceller(),
        meeting: Arc::new(Mutex::new(meeting)),
        event_tx,
        chat: RwLock::new(chat),
        config: RwLock::new(config.clone()),
    });

    let app = build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, api_base = %config.api_base, interactive = config.interactive, "Roundtable server listening");
    println!("🚀 Roundtable Server running at http://{}", addr);
    println!("   Meeting: /api/v1/meeting, /send, /summary, /cancel, /clear, /export, /events");
    println!("   Chat:    /api/v1/chat/:agent (GET, POST, DELETE)");
    println!("   Config:  /api/v1/config (GET, PATCH)");
    println!("   Docs:    /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roundtable_server=info,roundtable_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = config::resolve().await;
    if let Some(api_base) = args.api_base {
        config.api_base = api_base;
    }

    match args.command {
        Some(CliCommand::Run { topic, interactive }) => {
            let config = config.with_interactive(interactive);
            cli::run_meeting(topic, config, open_store()?).await
        }
        Some(CliCommand::Export { format }) => {
            cli::export_stored(&config, open_store()?.as_ref(), format).await
        }
        Some(CliCommand::Clear { all }) => cli::clear_stored(&config, open_store()?.as_ref(), all),
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, 8080).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use roundtable_core::state::MemoryConversationStore;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let config = MeetingConfig::default()
            .with_api_base("http://127.0.0.1:9")
            .with_stage_delay_ms(0);
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());
        let transport: Arc<dyn AgentTransport> = Arc::new(HttpTransport::new(&config).unwrap());
        let (event_tx, _) = broadcast::channel(16);

        let meeting = TurnOrchestrator::new(
            AgentRegistry::new(&config.api_base),
            transport.clone(),
            store.clone(),
            config.clone(),
        )
        .unwrap();
        let chat = DirectChat::new(
            AgentRegistry::new(&config.api_base),
            transport,
            store,
            config.clone(),
        );

        Arc::new(AppState {
            snapshots: meeting.subscribe(),
            canceller: meeting.canceller(),
            meeting: Arc::new(Mutex::new(meeting)),
            event_tx,
            chat: RwLock::new(chat),
            config: RwLock::new(config),
        })
    }

    async fn call(state: SharedState, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_empty_meeting_snapshot() {
        let (status, body) = call(test_state(), "GET", "/api/v1/meeting", "").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 0);
        // Idle has no current stage
        assert!(json["cursor"]["currentAgentIndex"].is_null());
        assert_eq!(json["cursor"]["isProcessing"], false);
    }

    #[tokio::test]
    async fn test_export_without_output_is_422() {
        let (status, body) = call(test_state(), "POST", "/api/v1/meeting/export", "{}").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.contains("nothing to export"));
    }

    #[tokio::test]
    async fn test_send_while_busy_is_409() {
        let state = test_state();
        let _guard = state.meeting.clone().try_lock_owned().unwrap();
        let (status, _) = call(state.clone(), "POST", "/api/v1/meeting/send", r#"{"input":"x"}"#).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_with_nothing_running() {
        let (status, body) = call(test_state(), "POST", "/api/v1/meeting/cancel", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#""success":false"#));
    }

    #[tokio::test]
    async fn test_unknown_chat_agent_is_404() {
        let (status, _) = call(test_state(), "GET", "/api/v1/chat/designer", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_agents_in_pipeline_order() {
        let (_, body) = call(test_state(), "GET", "/api/v1/agents", "").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        let ids: Vec<&str> = json["agents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["analyst", "architect", "developer", "tester"]);
    }

    #[test]
    fn test_openapi_lists_meeting_routes() {
        let spec = ApiDoc::openapi().to_json().unwrap();
        assert!(spec.contains("/api/v1/meeting/send"));
        assert!(spec.contains("/api/v1/chat/{agent}"));
    }
}
