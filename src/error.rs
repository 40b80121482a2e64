use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Required startup settings are missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required identity claim was missing.
    #[error("Identity mapping failed: {0}")]
    Mapping(String),

    /// Bad credentials, provider denial or network failure during login.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The current session could not be verified.
    #[error("Session verification failed: {0}")]
    SessionVerification(String),

    /// The backend rejected a profile update.
    #[error("Profile update failed: {0}")]
    ProfileUpdate(String),

    /// A non-2xx or `success:false` answer from the backend.
    ///
    /// Only produced by the data-fetching layer; converted to one of the
    /// variants above before it reaches a caller of the store.
    #[error("{message}")]
    Backend {
        status: Option<u16>,
        message: String,
    },

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable storage could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A persisted record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The user-visible message, without the taxonomy prefix.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Authentication(msg)
            | AppError::SessionVerification(msg)
            | AppError::ProfileUpdate(msg)
            | AppError::Validation(msg)
            | AppError::Mapping(msg) => msg.clone(),
            AppError::Backend { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string())
    }
}

impl From<sonic_rs::Error> for AppError {
    fn from(e: sonic_rs::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Configuration(ref msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string())
            }

            AppError::Mapping(ref msg) => {
                tracing::warn!("Identity mapping failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "Authentication failed".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::SessionVerification(ref msg) => {
                tracing::warn!("Session verification failed: {}", msg);
                (StatusCode::UNAUTHORIZED, "Session expired".to_string())
            }

            AppError::ProfileUpdate(ref msg) => {
                tracing::warn!("Profile update failed: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }

            AppError::Backend { status, ref message } => {
                tracing::warn!("Backend error ({:?}): {}", status, message);
                (StatusCode::BAD_GATEWAY, message.clone())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Storage(ref e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }

            AppError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Http(ref e) => {
                tracing::error!("HTTP error: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream unavailable".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
