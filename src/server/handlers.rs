use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::DeploymentMode;
use crate::server::{iso_timestamp, RelayState};

const MISSING_MESSAGE: &str = "Request body must contain a 'message' field";
const GENERIC_ERROR: &str = "Internal server error";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub timestamp: String,
    pub bot_active: bool,
    /// `null` when no deployment mode was configured
    pub environment: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct IntakeAck {
    pub message: &'static str,
    pub timestamp: String,
}

/// A validated intake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    timestamp: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { timestamp: String },
    Internal { message: String, timestamp: String },
    Unhandled { message: String, timestamp: String },
    NotFound { message: String, timestamp: String },
}

/// Error detail is only shown to callers in development.
pub fn client_detail(mode: DeploymentMode, detail: impl std::fmt::Display) -> String {
    if mode.exposes_error_detail() {
        detail.to_string()
    } else {
        GENERIC_ERROR.to_string()
    }
}

impl ApiError {
    pub fn internal(mode: DeploymentMode, detail: impl std::fmt::Display, timestamp: String) -> Self {
        ApiError::Internal {
            message: client_detail(mode, detail),
            timestamp,
        }
    }

    pub fn unhandled(mode: DeploymentMode, detail: impl std::fmt::Display, timestamp: String) -> Self {
        ApiError::Unhandled {
            message: client_detail(mode, detail),
            timestamp,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest { timestamp } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "Bad Request",
                    message: MISSING_MESSAGE.to_string(),
                    timestamp,
                },
            ),
            ApiError::Internal { message, timestamp } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: GENERIC_ERROR,
                    message,
                    timestamp,
                },
            ),
            ApiError::Unhandled { message, timestamp } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "Something went wrong!",
                    message,
                    timestamp,
                },
            ),
            ApiError::NotFound { message, timestamp } => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "Not Found",
                    message,
                    timestamp,
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

pub async fn health(State(state): State<RelayState>) -> Json<HealthSnapshot> {
    Json(HealthSnapshot {
        status: "ok",
        timestamp: iso_timestamp(),
        bot_active: state.bot_active(),
        environment: state.mode.name(),
    })
}

/// Accepts only a JSON object whose `message` is a non-empty string.
pub fn parse_intake(body: &[u8]) -> Option<IntakeRequest> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let message = value.get("message")?.as_str()?;
    if message.is_empty() {
        return None;
    }
    Some(IntakeRequest {
        message: message.to_string(),
    })
}

/// Hook for acting on Mini App data. Currently the payload is only acknowledged.
fn process_intake(_request: &IntakeRequest) -> Result<()> {
    Ok(())
}

pub async fn send_data(
    State(state): State<RelayState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IntakeAck>, ApiError> {
    let timestamp = iso_timestamp();

    // Oversized or unreadable bodies get the same JSON 500 as any unhandled error
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            error!("[{}] Error: {}", timestamp, rejection);
            return Err(ApiError::unhandled(state.mode, rejection.body_text(), timestamp));
        }
    };

    let request = match parse_intake(&body) {
        Some(request) => request,
        None => {
            debug!("[{}] Rejected intake body ({} bytes)", timestamp, body.len());
            return Err(ApiError::BadRequest { timestamp });
        }
    };

    debug!("[{}] Received data: {:?}", timestamp, request.message);

    if let Err(e) = process_intake(&request) {
        error!("[{}] Error processing data: {:#}", timestamp, e);
        return Err(ApiError::internal(state.mode, format!("{:#}", e), timestamp));
    }

    Ok(Json(IntakeAck {
        message: "Data received successfully!",
        timestamp,
    }))
}

pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::NotFound {
        message: format!("Cannot {} {}", method, uri.path()),
        timestamp: iso_timestamp(),
    }
}
