use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::security::SessionError;

/// Error classification for JSON error bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Client errors (4xx)
    BadRequest,
    Unauthorized,
    NotFound,

    // Server errors (5xx)
    InternalServerError,
    BadGateway,
    GatewayTimeout,

    // Policy specific errors
    CsrfValidationFailed,
    MaxSessionsExceeded,
    SessionStoreError,
    ConfigurationError,
}

impl ErrorCode {
    /// Classify an authentication error
    pub fn for_auth_error(error: &AuthError) -> Self {
        match error {
            AuthError::Unauthenticated => ErrorCode::Unauthorized,
            AuthError::Csrf(_) => ErrorCode::CsrfValidationFailed,
            AuthError::Session(SessionError::MaxSessionsExceeded) => {
                ErrorCode::MaxSessionsExceeded
            }
            AuthError::Session(SessionError::Store(_)) => ErrorCode::SessionStoreError,
            AuthError::ConfigError(_) | AuthError::InvalidConfig { .. } => {
                ErrorCode::ConfigurationError
            }
            AuthError::Internal(_) => ErrorCode::InternalServerError,
            AuthError::HttpError(_) | AuthError::JsonError(_) => ErrorCode::BadGateway,
            AuthError::Timeout => ErrorCode::GatewayTimeout,
            _ => ErrorCode::BadRequest,
        }
    }
}

/// Structured error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
    pub status: u16,
}

/// Details of an error occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub request_id: String,
    pub timestamp: String,
    pub path: String,
    pub method: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Builder for creating error responses
pub struct ErrorResponseBuilder {
    code: ErrorCode,
    message: String,
    details: Option<String>,
    request_id: String,
    timestamp: String,
    path: String,
    method: String,
}

impl ErrorResponseBuilder {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            request_id: "unknown".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: "/".to_string(),
            method: "GET".to_string(),
        }
    }

    /// Builder seeded from an authentication error
    pub fn from_auth_error(error: &AuthError) -> Self {
        let message = match error {
            AuthError::Csrf(_) => "CSRF validation failed".to_string(),
            e if e.is_internal() => "Internal server error".to_string(),
            e => e.to_string(),
        };
        let builder = Self::new(ErrorCode::for_auth_error(error), message);
        match error {
            AuthError::Csrf(reason) => builder.details(reason.to_string()),
            _ => builder,
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn build(self) -> ErrorResponse {
        let status = self.code_to_status(&self.code);

        ErrorResponse {
            error: ErrorDetails {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
                timestamp: self.timestamp,
                path: self.path,
                method: self.method,
            },
            status,
        }
    }

    fn code_to_status(&self, code: &ErrorCode) -> u16 {
        match code {
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::InternalServerError => 500,
            ErrorCode::BadGateway => 502,
            ErrorCode::GatewayTimeout => 504,
            ErrorCode::CsrfValidationFailed => 403,
            ErrorCode::MaxSessionsExceeded => 409,
            ErrorCode::SessionStoreError => 500,
            ErrorCode::ConfigurationError => 500,
        }
    }
}

/// Helper functions for common error types
pub mod errors {
    use super::*;

    pub fn not_found(path: &str, request_id: &str) -> ErrorResponse {
        ErrorResponseBuilder::new(ErrorCode::NotFound, "Resource not found")
            .path(path)
            .request_id(request_id)
            .build()
    }
}
