use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} {reason}")]
    HttpStatus { status: u16, reason: String },

    /// Non-2xx from the standings proxy. Carries the proxy's response body verbatim.
    #[error("{0}")]
    Proxy(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing caller identity: {0}")]
    Unauthorized(String),

    #[error("Insufficient permission: {0}")]
    Forbidden(String),

    #[error("Tournament {0} is not linked to this team")]
    NotLinked(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether a failed fetch is worth a single retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(e) => e.is_timeout() || e.is_connect(),
            AppError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotLinked(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Http(_) | AppError::HttpStatus { .. } | AppError::Proxy(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Config(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
