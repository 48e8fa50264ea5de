use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

// Struktur response error yang konsisten untuk semua endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// Enum untuk semua jenis error yang mungkin terjadi di settlement service
#[derive(Debug)]
pub enum AppError {
    DatabaseError(sqlx::Error),
    ValidationError(String),
    UnauthorizedError(String),
    ForbiddenError(String),
    NotFoundError(String),
    // State machine menolak transisi (state, event) di luar tabel
    InvalidTransition(String),
    // Subject payment tidak dalam kondisi payable
    InvalidSubject(String),
    InsufficientFunds(String),
    TooManyPending(String),
    ProviderAtCapacity(String),
    NoRevisionsRemaining,
    // Signature webhook tidak valid; ditolak sebelum menyentuh state
    AuthenticityError,
    // Webhook untuk gateway_txn_id yang tidak dikenal (operator alert)
    UnknownTransaction(String),
    // Duplikasi yang aman; bukan error untuk caller webhook
    AlreadyProcessed(String),
    GatewayUnavailable(String),
    GatewayError(String),
    InternalError(String),
    TokenError(String),
    HttpClientError(reqwest::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::UnauthorizedError(msg) => write!(f, "Unauthorized error: {}", msg),
            AppError::ForbiddenError(msg) => write!(f, "Forbidden error: {}", msg),
            AppError::NotFoundError(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidTransition(msg) => write!(f, "Invalid transition: {}", msg),
            AppError::InvalidSubject(msg) => write!(f, "Invalid subject: {}", msg),
            AppError::InsufficientFunds(msg) => write!(f, "Insufficient funds: {}", msg),
            AppError::TooManyPending(msg) => write!(f, "Too many pending: {}", msg),
            AppError::ProviderAtCapacity(msg) => write!(f, "Provider at capacity: {}", msg),
            AppError::NoRevisionsRemaining => write!(f, "No revisions remaining"),
            AppError::AuthenticityError => write!(f, "Webhook signature invalid"),
            AppError::UnknownTransaction(msg) => write!(f, "Unknown transaction: {}", msg),
            AppError::AlreadyProcessed(msg) => write!(f, "Already processed: {}", msg),
            AppError::GatewayUnavailable(msg) => write!(f, "Gateway unavailable: {}", msg),
            AppError::GatewayError(msg) => write!(f, "Gateway error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::TokenError(msg) => write!(f, "Token error: {}", msg),
            AppError::HttpClientError(e) => write!(f, "HTTP client error: {}", e),
        }
    }
}

impl std::error::Error for AppError {}

// Konversi dari sqlx::Error ke AppError
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

// Konversi dari jsonwebtoken::errors::Error ke AppError
impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::TokenError(err.to_string())
    }
}

// Konversi dari reqwest::Error ke AppError
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::HttpClientError(err)
    }
}

// Money arithmetic errors selalu berarti input tidak valid
impl From<shared::MoneyError> for AppError {
    fn from(err: shared::MoneyError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

// Implementasi IntoResponse agar AppError bisa langsung jadi response axum
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Terjadi kesalahan pada database".to_string(),
                    if cfg!(debug_assertions) {
                        Some(e.to_string())
                    } else {
                        None
                    },
                )
            }
            AppError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
                None,
            ),
            AppError::UnauthorizedError(msg) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                msg.clone(),
                None,
            ),
            AppError::ForbiddenError(msg) => (
                StatusCode::FORBIDDEN,
                "forbidden",
                msg.clone(),
                None,
            ),
            AppError::NotFoundError(msg) => {
                (StatusCode::NOT_FOUND, "not_found", msg.clone(), None)
            }
            AppError::InvalidTransition(msg) => {
                tracing::warn!("Invalid transition rejected: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_transition",
                    msg.clone(),
                    None,
                )
            }
            AppError::InvalidSubject(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_subject",
                msg.clone(),
                None,
            ),
            AppError::InsufficientFunds(msg) => (
                StatusCode::BAD_REQUEST,
                "insufficient_funds",
                msg.clone(),
                None,
            ),
            AppError::TooManyPending(msg) => (
                StatusCode::BAD_REQUEST,
                "too_many_pending",
                msg.clone(),
                None,
            ),
            AppError::ProviderAtCapacity(msg) => (
                StatusCode::BAD_REQUEST,
                "provider_at_capacity",
                msg.clone(),
                None,
            ),
            AppError::NoRevisionsRemaining => (
                StatusCode::BAD_REQUEST,
                "no_revisions_remaining",
                "Jatah revisi untuk order ini sudah habis".to_string(),
                None,
            ),
            AppError::AuthenticityError => (
                StatusCode::UNAUTHORIZED,
                "authenticity_error",
                "Signature webhook tidak valid".to_string(),
                None,
            ),
            AppError::UnknownTransaction(msg) => {
                tracing::error!("Orphan gateway event: {}", msg);
                (
                    StatusCode::NOT_FOUND,
                    "unknown_transaction",
                    "Transaksi gateway tidak dikenal".to_string(),
                    None,
                )
            }
            AppError::AlreadyProcessed(msg) => (
                StatusCode::CONFLICT,
                "already_processed",
                msg.clone(),
                None,
            ),
            AppError::GatewayUnavailable(msg) => {
                tracing::error!("Gateway unavailable: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "gateway_unavailable",
                    "Payment gateway sedang tidak tersedia".to_string(),
                    None,
                )
            }
            AppError::GatewayError(msg) => {
                tracing::error!("Gateway error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "payment_gateway_error",
                    "Terjadi kesalahan pada payment gateway".to_string(),
                    if cfg!(debug_assertions) {
                        Some(msg.clone())
                    } else {
                        None
                    },
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Terjadi kesalahan internal server".to_string(),
                    if cfg!(debug_assertions) {
                        Some(msg.clone())
                    } else {
                        None
                    },
                )
            }
            AppError::TokenError(msg) => (
                StatusCode::UNAUTHORIZED,
                "token_error",
                "Token tidak valid atau sudah kadaluarsa".to_string(),
                if cfg!(debug_assertions) {
                    Some(msg.clone())
                } else {
                    None
                },
            ),
            AppError::HttpClientError(e) => {
                tracing::error!("HTTP client error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "http_client_error",
                    "Terjadi kesalahan komunikasi dengan external service".to_string(),
                    if cfg!(debug_assertions) {
                        Some(e.to_string())
                    } else {
                        None
                    },
                )
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        };

        (status, Json(error_response)).into_response()
    }
}

// Helper functions untuk membuat error dengan mudah
impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFoundError(msg.into())
    }

    pub fn invalid_transition(from: &str, event: &str) -> Self {
        AppError::InvalidTransition(format!(
            "Transisi tidak diizinkan: {} tidak menerima event {}",
            from, event
        ))
    }

    pub fn invalid_subject(msg: impl Into<String>) -> Self {
        AppError::InvalidSubject(msg.into())
    }

    pub fn insufficient_funds(msg: impl Into<String>) -> Self {
        AppError::InsufficientFunds(msg.into())
    }

    pub fn already_processed(msg: impl Into<String>) -> Self {
        AppError::AlreadyProcessed(msg.into())
    }

    pub fn gateway(msg: impl Into<String>) -> Self {
        AppError::GatewayError(msg.into())
    }

    pub fn gateway_unavailable(msg: impl Into<String>) -> Self {
        AppError::GatewayUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::InternalError(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::UnauthorizedError(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::ForbiddenError(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }
}

// Type alias untuk Result dengan AppError sebagai error type
pub type AppResult<T> = Result<T, AppError>;
