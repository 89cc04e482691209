use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;

use crate::storage::StorageError;
use crate::validation::{FieldError, ValidationErrors};

pub type AppResult<T> = Result<T, AppError>;

pub const CODE_INVALID_CREDENTIALS: &str = "auth/invalid-credentials";
pub const CODE_EMAIL_IN_USE: &str = "auth/email-already-in-use";
pub const CODE_REQUIRES_RECENT_LOGIN: &str = "auth/requires-recent-login";
pub const CODE_CONFIRMATION_REQUIRED: &str = "confirmation-required";
pub const CODE_STORAGE_UNAUTHORIZED: &str = "storage/unauthorized";
pub const CODE_STORAGE_RETRY_LIMIT: &str = "storage/retry-limit-exceeded";
pub const CODE_STORAGE_UNKNOWN: &str = "storage/unknown";

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: Option<String>,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn invalid_credentials() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Invalid email or password.")
            .with_code(CODE_INVALID_CREDENTIALS)
    }

    pub fn email_in_use() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "This email is already in use by another account",
        )
        .with_code(CODE_EMAIL_IN_USE)
    }

    pub fn requires_recent_login() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "Please log out and log back in to update your email",
        )
        .with_code(CODE_REQUIRES_RECENT_LOGIN)
    }

    pub fn confirmation_required() -> Self {
        Self::new(
            StatusCode::PRECONDITION_REQUIRED,
            "deletion must be confirmed with confirm=true",
        )
        .with_code(CODE_CONFIRMATION_REQUIRED)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code}): {}", self.status, self.message),
            None => write!(f, "{}: {}", self.status, self.message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<FieldError> for AppError {
    fn from(value: FieldError) -> Self {
        let code = value.code();
        AppError::bad_request(value.message).with_code(code)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(value: ValidationErrors) -> Self {
        match value.first() {
            Some(first) => AppError::from(first.clone()),
            None => AppError::bad_request("invalid input"),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Unauthorized(_) => AppError::new(
                StatusCode::FORBIDDEN,
                "You do not have permission to upload images.",
            )
            .with_code(CODE_STORAGE_UNAUTHORIZED),
            StorageError::RetryLimitExceeded(_) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Network error. Please check your internet connection and try again.",
            )
            .with_code(CODE_STORAGE_RETRY_LIMIT),
            StorageError::NotFound(_) => AppError::not_found(),
            StorageError::Other(err) => AppError::new(
                StatusCode::BAD_GATEWAY,
                format!("Failed to upload image. Please try again. ({err})"),
            )
            .with_code(CODE_STORAGE_UNKNOWN),
        }
    }
}
