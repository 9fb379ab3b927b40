//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llama_engine::{ErrorKind, LlamaError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Llama(#[from] LlamaError),

    /// Malformed body or path; reported as `invalid_argument`.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("server at capacity")]
    ServiceUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Llama(e) => status_for(e.kind()),
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Llama(e) => e.kind().as_str(),
            ServerError::InvalidRequest(_) => ErrorKind::InvalidArgument.as_str(),
            ServerError::ServiceUnavailable => "server_at_capacity",
            ServerError::Internal(_) => "server_error",
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument | ErrorKind::Tokenization => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidHandle => StatusCode::NOT_FOUND,
        ErrorKind::Template => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ContextOverflow => StatusCode::CONFLICT,
        ErrorKind::ModelLoad
        | ErrorKind::SessionInit
        | ErrorKind::Detokenization
        | ErrorKind::Generation => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }));

        (status, body).into_response()
    }
}
