//! One-on-one chat routes

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use roundtable_core::Message;
use serde::Serialize;
use utoipa::ToSchema;

use super::meeting::SendRequest;
use super::{api_error, ApiError, ApiResponse};
use crate::SharedState;

#[derive(Serialize, ToSchema)]
pub struct ChatResponse {
    pub agent: String,
    /// Imported previous-stage turns first, then the agent's own session
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<Message>,
}

pub fn routes() -> Router<SharedState> {
    Router::new().route("/:agent", get(open_chat).post(send_chat).delete(clear_chat))
}

/// Open a chat: previous-stage context plus the agent's session
#[utoipa::path(
    get,
    path = "/api/v1/chat/{agent}",
    tag = "chat",
    params(("agent" = String, Path, description = "Agent id, e.g. `architect`")),
    responses(
        (status = 200, description = "Chat view", body = ChatResponse),
        (status = 404, description = "Unknown agent", body = ApiResponse)
    )
)]
pub async fn open_chat(
    State(state): State<SharedState>,
    Path(agent): Path<String>,
) -> Result<Json<ChatResponse>, ApiError> {
    let messages = state.chat.read().await.open(&agent).map_err(api_error)?;
    Ok(Json(ChatResponse { agent, messages }))
}

/// Send a message and wait for the full reply
#[utoipa::path(
    post,
    path = "/api/v1/chat/{agent}",
    tag = "chat",
    params(("agent" = String, Path, description = "Agent id")),
    request_body = SendRequest,
    responses(
        (status = 200, description = "Updated session", body = ChatResponse),
        (status = 404, description = "Unknown agent", body = ApiResponse)
    )
)]
pub async fn send_chat(
    State(state): State<SharedState>,
    Path(agent): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let messages = state
        .chat
        .read()
        .await
        .send(&agent, &req.input)
        .await
        .map_err(api_error)?;
    Ok(Json(ChatResponse { agent, messages }))
}

/// Forget this agent's chat session
#[utoipa::path(
    delete,
    path = "/api/v1/chat/{agent}",
    tag = "chat",
    params(("agent" = String, Path, description = "Agent id")),
    responses(
        (status = 200, description = "Session cleared", body = ApiResponse),
        (status = 404, description = "Unknown agent", body = ApiResponse)
    )
)]
pub async fn clear_chat(
    State(state): State<SharedState>,
    Path(agent): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    state.chat.read().await.clear(&agent).await.map_err(api_error)?;
    Ok(ApiResponse::ok(format!("Chat with {} cleared", agent)))
}
