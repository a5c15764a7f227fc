//! API error responses

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sluice_core::AcquisitionError;
use tracing::{error, warn};

/// Errors returned by gateway handlers, rendered as `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error("Missing required parameter: {name}")]
    MissingParameter { name: &'static str },

    #[error("Invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },
}

impl ApiError {
    /// Status code for the error. Bad `Range` headers normally never get
    /// here, the range streamer answers them with its own bodiless 416.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParameter { .. } | ApiError::InvalidParameter { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Acquisition(e) => match e {
                AcquisitionError::MalformedIdentifier(_) => StatusCode::BAD_REQUEST,
                AcquisitionError::NoPlayableFile { .. }
                | AcquisitionError::UnknownIdentifier { .. }
                | AcquisitionError::FileNotFound { .. } => StatusCode::NOT_FOUND,
                AcquisitionError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
                AcquisitionError::EngineInvocation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                AcquisitionError::AcquisitionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, message);
        } else {
            warn!("Request rejected with {}: {}", status, message);
        }

        match self {
            ApiError::Acquisition(AcquisitionError::NoPlayableFile { .. }) => {
                (status, Json(json!({ "error": message, "files": [] }))).into_response()
            }
            _ => (status, Json(json!({ "error": message }))).into_response(),
        }
    }
}
