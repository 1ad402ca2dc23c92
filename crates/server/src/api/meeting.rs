//! Meeting room routes: drive the pipeline, stream its events, export it

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use roundtable_core::export::write_exports;
use roundtable_core::meeting::PipelineCursor;
use roundtable_core::{Error, ExportFormat, ExportProjector, Message};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use utoipa::ToSchema;

use super::{api_error, ApiError, ApiResponse};
use crate::SharedState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeetingResponse {
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<Message>,
    #[schema(value_type = Object)]
    pub cursor: PipelineCursor,
}

#[derive(Deserialize, ToSchema)]
pub struct SendRequest {
    /// Topic, feedback, or an advance word such as `next`
    pub input: String,
}

#[derive(Deserialize, Default, ToSchema)]
pub struct ExportRequest {
    /// `text` or `markdown`; both when omitted
    #[schema(value_type = Option<String>, example = "markdown")]
    pub format: Option<ExportFormat>,
}

#[derive(Serialize, ToSchema)]
pub struct ExportResponse {
    pub files: Vec<String>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_meeting))
        .route("/send", post(send_message))
        .route("/summary", post(request_summary))
        .route("/cancel", post(cancel_turn))
        .route("/clear", post(clear_meeting))
        .route("/export", post(export_meeting))
        .route("/events", get(events))
}

/// Current messages and pipeline cursor
#[utoipa::path(
    get,
    path = "/api/v1/meeting",
    tag = "meeting",
    responses(
        (status = 200, description = "Meeting snapshot", body = MeetingResponse)
    )
)]
pub async fn get_meeting(State(state): State<SharedState>) -> Json<MeetingResponse> {
    let snapshot = state.snapshots.borrow().clone();
    Json(MeetingResponse {
        messages: snapshot.messages,
        cursor: snapshot.cursor,
    })
}

/// Submit a topic, feedback, or an advance word. Runs in the background;
/// progress arrives on `/api/v1/meeting/events`.
#[utoipa::path(
    post,
    path = "/api/v1/meeting/send",
    tag = "meeting",
    request_body = SendRequest,
    responses(
        (status = 202, description = "Input accepted", body = ApiResponse),
        (status = 409, description = "A turn is already in flight", body = ApiResponse)
    )
)]
pub async fn send_message(
    State(state): State<SharedState>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    let mut meeting = state
        .meeting
        .clone()
        .try_lock_owned()
        .map_err(|_| api_error(Error::Busy))?;
    meeting.set_config(state.config.read().await.clone());

    tokio::spawn(async move {
        match meeting.handle_send(&req.input).await {
            Ok(outcome) => tracing::info!(?outcome, "Meeting input handled"),
            Err(e) => tracing::error!(error = %e, "Meeting input failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, ApiResponse::ok("Input accepted")))
}

/// Ask the summary agent to summarize the meeting
#[utoipa::path(
    post,
    path = "/api/v1/meeting/summary",
    tag = "meeting",
    responses(
        (status = 202, description = "Summary requested", body = ApiResponse),
        (status = 409, description = "A turn is already in flight", body = ApiResponse)
    )
)]
pub async fn request_summary(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    let mut meeting = state
        .meeting
        .clone()
        .try_lock_owned()
        .map_err(|_| api_error(Error::Busy))?;
    meeting.set_config(state.config.read().await.clone());

    tokio::spawn(async move {
        match meeting.summarize().await {
            Ok(outcome) => tracing::info!(?outcome, "Summary request handled"),
            Err(e) => tracing::error!(error = %e, "Summary request failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, ApiResponse::ok("Summary requested")))
}

/// Cancel the in-flight turn, if any
#[utoipa::path(
    post,
    path = "/api/v1/meeting/cancel",
    tag = "meeting",
    responses(
        (status = 200, description = "`success` is false when nothing was running", body = ApiResponse)
    )
)]
pub async fn cancel_turn(State(state): State<SharedState>) -> Json<ApiResponse> {
    if state.canceller.cancel() {
        ApiResponse::ok("Cancelling")
    } else {
        ApiResponse::failed("Nothing to cancel")
    }
}

/// Drop the meeting session and reset the cursor
#[utoipa::path(
    post,
    path = "/api/v1/meeting/clear",
    tag = "meeting",
    responses(
        (status = 200, description = "Session cleared", body = ApiResponse),
        (status = 409, description = "A turn is already in flight", body = ApiResponse)
    )
)]
pub async fn clear_meeting(State(state): State<SharedState>) -> Result<Json<ApiResponse>, ApiError> {
    let mut meeting = state
        .meeting
        .try_lock()
        .map_err(|_| api_error(Error::Busy))?;
    meeting.clear().await.map_err(api_error)?;
    Ok(ApiResponse::ok("Meeting cleared"))
}

/// Write the meeting record under `.roundtable/exports/`
#[utoipa::path(
    post,
    path = "/api/v1/meeting/export",
    tag = "meeting",
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Written files", body = ExportResponse),
        (status = 422, description = "No summary or agent output to export", body = ApiResponse)
    )
)]
pub async fn export_meeting(
    State(state): State<SharedState>,
    req: Option<Json<ExportRequest>>,
) -> Result<Json<ExportResponse>, ApiError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let formats = match req.format {
        Some(format) => vec![format],
        None => vec![ExportFormat::Text, ExportFormat::Markdown],
    };

    let messages = state.snapshots.borrow().messages.clone();
    let registry = state.registry().await;
    let projector = ExportProjector::new(&registry);
    let at = Utc::now();

    let documents = formats
        .into_iter()
        .map(|format| projector.project(&messages, format, at))
        .collect::<Result<Vec<_>, _>>()
        .map_err(api_error)?;
    let paths = write_exports(&documents).await.map_err(api_error)?;

    Ok(Json(ExportResponse {
        files: paths.iter().map(|p| p.display().to_string()).collect(),
    }))
}

/// Server-sent stream of meeting events
#[utoipa::path(
    get,
    path = "/api/v1/meeting/events",
    tag = "meeting",
    responses(
        (status = 200, description = "SSE stream of MeetingEvent JSON objects")
    )
)]
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    // heartbeat every 15 seconds of silence
    let stream = stream::unfold(rx, |mut rx| async move {
        let next = tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await;

        match next {
            Ok(Ok(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), rx))
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "Event subscriber lagged");
                Some((Ok(Event::default().comment("lagged")), rx))
            }
            Ok(Err(RecvError::Closed)) => None,
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), rx)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
