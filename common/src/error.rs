use actix_web::{HttpResponse, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

pub type Res<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    // === CONVERSION ERRORS ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    JWT(#[from] jsonwebtoken::errors::Error),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    // === GATEWAY ERRORS ===
    #[error("Missing or invalid API key")]
    MissingApiKey,

    #[error("{0}")]
    InvalidApiKey(String),

    #[error("API key is inactive")]
    InactiveApiKey,

    #[error("{0}")]
    RateLimitExceeded(String),

    // === APPLICATION ERRORS ===
    #[error("Authorization error: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

/// Body of every error returned by the service:
/// `{ "error": { "message": ..., "type": ..., "code": ... } }`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub code: &'static str,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_)
            | AppError::JWT(_)
            | AppError::Reqwest(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MissingApiKey
            | AppError::InvalidApiKey(_)
            | AppError::InactiveApiKey
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable reason reported in `error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_)
            | AppError::JWT(_)
            | AppError::Reqwest(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::MissingApiKey => "MISSING_API_KEY",
            AppError::InvalidApiKey(_) => "INVALID_API_KEY",
            AppError::InactiveApiKey => "INACTIVE_API_KEY",
            AppError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "INVALID_REQUEST",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
        }
    }

    /// Error class reported in `error.type`, derived from the status code.
    pub fn kind(&self) -> &'static str {
        let status = self.status();
        if status.is_server_error() {
            "server_error"
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            "rate_limit_error"
        } else {
            "api_error"
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let is_dev = cfg!(debug_assertions);

        let message = match self {
            AppError::Database(_)
            | AppError::JWT(_)
            | AppError::Reqwest(_)
            | AppError::Internal(_) => {
                if is_dev {
                    self.to_string()
                } else {
                    "Internal server error".to_string()
                }
            }
            _ => self.to_string(),
        };

        ErrorBody {
            error: ErrorDetail {
                message,
                kind: self.kind(),
                code: self.code(),
            },
        }
    }

    pub fn to_http_response(&self) -> HttpResponse {
        match self {
            // === CONVERSION ERRORS ===
            AppError::Database(error) => log::error!("Database error: {}", error),
            AppError::JWT(error) => log::error!("JWT error: {}", error),
            AppError::Reqwest(error) => log::error!("Reqwest error: {}", error),

            // === APPLICATION ERRORS ===
            AppError::Upstream(error) => log::error!("Upstream error: {}", error),
            AppError::Internal(error) => log::error!("Internal error: {}", error),
            _ => {}
        }

        HttpResponse::build(self.status()).json(self.to_body())
    }
}

impl actix_web::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        self.to_http_response()
    }
}
