use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors that can escape a request handler.
///
/// Client mistakes map to 400, upstream provider failures carry the status
/// the provider reported (falling back to 500), and anything unexpected is
/// logged and collapsed into a generic 500.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RelayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            RelayError::Upstream { status, message } => {
                let code = status
                    .and_then(|s| StatusCode::from_u16(s).ok())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                tracing::warn!(status = %code, %message, "upstream call failed");
                (code, message)
            }
            RelayError::Internal(err) => {
                tracing::error!(error = ?err, "unexpected handler error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
