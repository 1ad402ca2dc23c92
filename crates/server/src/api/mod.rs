//! HTTP handlers, grouped by resource

pub mod chat;
pub mod meeting;

use axum::{http::StatusCode, response::Json};
use roundtable_core::Error;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }

    pub fn failed(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: message.into(),
        })
    }
}

pub type ApiError = (StatusCode, Json<ApiResponse>);

/// Map a core error onto a status code and message body
pub fn api_error(err: Error) -> ApiError {
    let status = match &err {
        Error::EndpointUnresolved(_) => StatusCode::NOT_FOUND,
        Error::EmptyExportTarget => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Busy => StatusCode::CONFLICT,
        Error::Transport { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
    (status, ApiResponse::failed(err.to_string()))
}
