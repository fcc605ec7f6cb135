//! Unified application error model and mapping helpers.
//! One error enum is shared by the identity flow, the directory and the HTTP frontend,
//! along with the mapping to HTTP status codes and user-visible notices.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    NotFound { code: String, message: String },
    Inactive { code: String, message: String },
    Deleted { code: String, message: String },
    AlreadyAccepted { code: String, message: String },
    Unauthorized { code: String, message: String },
    UserInput { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::NotFound { code, .. }
            | AppError::Inactive { code, .. }
            | AppError::Deleted { code, .. }
            | AppError::AlreadyAccepted { code, .. }
            | AppError::Unauthorized { code, .. }
            | AppError::UserInput { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::NotFound { message, .. }
            | AppError::Inactive { message, .. }
            | AppError::Deleted { message, .. }
            | AppError::AlreadyAccepted { message, .. }
            | AppError::Unauthorized { message, .. }
            | AppError::UserInput { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn inactive<S: Into<String>>(code: S, msg: S) -> Self { AppError::Inactive { code: code.into(), message: msg.into() } }
    pub fn deleted<S: Into<String>>(code: S, msg: S) -> Self { AppError::Deleted { code: code.into(), message: msg.into() } }
    pub fn already_accepted<S: Into<String>>(code: S, msg: S) -> Self { AppError::AlreadyAccepted { code: code.into(), message: msg.into() } }
    pub fn unauthorized<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::NotFound { .. } => 404,
            AppError::Inactive { .. } => 403,
            AppError::Deleted { .. } => 403,
            AppError::AlreadyAccepted { .. } => 409,
            AppError::Unauthorized { .. } => 403,
            AppError::UserInput { .. } => 400,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }

    /// Short text shown to the end user as a transient notification.
    /// Internal details stay in the logs.
    pub fn notice(&self) -> &'static str {
        match self {
            AppError::NotFound { .. } => "No account matches these credentials.",
            AppError::Inactive { .. } => "This account has been disabled. Contact an administrator.",
            AppError::Deleted { .. } => "This account no longer exists.",
            AppError::AlreadyAccepted { .. } => "This invitation has already been used.",
            AppError::Unauthorized { .. } => "You do not have access to this page.",
            AppError::UserInput { .. } => "The request was not valid.",
            AppError::Io { .. } => "The service is temporarily unavailable. Try again shortly.",
            AppError::Internal { .. } => "Something went wrong.",
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "status": "error",
            "code": self.code_str(),
            "message": self.message(),
            "notice": self.notice(),
        });
        (status, Json(body)).into_response()
    }
}
