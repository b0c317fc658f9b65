// Authentication Error Types
// Covers the OAuth2 login flow, the session policy and request forgery checks

use thiserror::Error;

use crate::security::{CsrfError, SessionError};

#[derive(Debug, Error)]
pub enum AuthError {
    // Access decisions
    #[error("Authentication required")]
    Unauthenticated,

    #[error("CSRF validation failed: {0}")]
    Csrf(#[from] CsrfError),

    // Session registry
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // OAuth2-related errors
    #[error("OAuth2 error: {0}")]
    OAuth2Error(String),

    #[error("Invalid OAuth2 state parameter")]
    InvalidState,

    #[error("OAuth2 code exchange failed: {0}")]
    CodeExchangeFailed(String),

    #[error("Failed to retrieve user info: {0}")]
    UserInfoFailed(String),

    #[error("Unsupported OAuth2 provider: {0}")]
    UnsupportedProvider(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    // Network/HTTP errors
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),

    #[error("Provider communication timeout")]
    Timeout,

    #[error("Internal authentication error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Timeout
        } else {
            AuthError::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::JsonError(err.to_string())
    }
}

impl AuthError {
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Unauthenticated => 401,

            AuthError::Csrf(_) => 403,

            AuthError::Session(SessionError::MaxSessionsExceeded) => 409,

            AuthError::Session(SessionError::Store(_))
            | AuthError::ConfigError(_)
            | AuthError::InvalidConfig { .. }
            | AuthError::Internal(_) => 500,

            AuthError::HttpError(_) | AuthError::JsonError(_) => 502,

            AuthError::Timeout => 504,

            _ => 400,
        }
    }

    /// Failures that mean the server itself is broken rather than the request
    pub fn is_internal(&self) -> bool {
        self.status_code() == 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AuthError::Unauthenticated.status_code(), 401);
        assert_eq!(AuthError::Csrf(CsrfError::MissingToken).status_code(), 403);
        assert_eq!(
            AuthError::Session(SessionError::MaxSessionsExceeded).status_code(),
            409
        );
        assert_eq!(
            AuthError::Session(SessionError::Store("down".to_string())).status_code(),
            500
        );
        assert_eq!(AuthError::InvalidState.status_code(), 400);
        assert_eq!(AuthError::Timeout.status_code(), 504);
    }

    #[test]
    fn test_store_failure_is_internal_not_unauthenticated() {
        let err = AuthError::from(SessionError::Store("down".to_string()));
        assert!(err.is_internal());
        assert!(!AuthError::Unauthenticated.is_internal());
    }

    #[test]
    fn test_error_display() {
        let err = AuthError::Csrf(CsrfError::TokenMismatch);
        assert_eq!(err.to_string(), "CSRF validation failed: CSRF token does not match");

        let err = AuthError::InvalidConfig {
            key: "security.max_sessions".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for security.max_sessions: must be at least 1"
        );
    }
}
