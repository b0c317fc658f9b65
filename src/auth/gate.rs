/// Access Gate
///
/// Decides whether a request may reach the application based on the session it
/// presents. The only write it performs is refreshing `last_access`.
use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use tracing::debug;

use crate::auth::AuthError;
use crate::security::{Principal, Session, SessionError, SessionLookup, SessionRegistry};

/// Authenticated user context injected into requests
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Arc<Principal>,
    pub session_id: String,
    /// Token to embed in forms as the CSRF parameter
    pub csrf_token: String,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.principal.id
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = crate::auth::middleware::AuthErrorResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AuthError::Unauthenticated.into())
    }
}

/// What the request's session cookie resolved to
#[derive(Debug, Clone)]
pub enum SessionState {
    /// No session cookie
    Absent,
    Valid(Session),
    /// A session id the registry does not consider valid
    Invalid,
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Valid(session) => Some(session),
            _ => None,
        }
    }
}

/// Outcome of the access check
#[derive(Debug, Clone)]
pub enum AccessDecision {
    Authorized(Session),
    /// Anonymous request let through because authentication is not required
    Anonymous,
    Unauthenticated,
    InvalidSession,
}

pub struct AccessGate {
    registry: Arc<SessionRegistry>,
    require_auth: bool,
}

impl AccessGate {
    pub fn new(registry: Arc<SessionRegistry>, require_auth: bool) -> Self {
        Self {
            registry,
            require_auth,
        }
    }

    /// Look up the session id once per request
    pub async fn resolve(&self, session_id: Option<&str>) -> Result<SessionState, SessionError> {
        let Some(session_id) = session_id else {
            return Ok(SessionState::Absent);
        };

        Ok(match self.registry.validate(session_id).await? {
            SessionLookup::Valid(session) => SessionState::Valid(session),
            SessionLookup::Invalid => SessionState::Invalid,
        })
    }

    pub fn decide(&self, state: &SessionState) -> AccessDecision {
        match state {
            SessionState::Valid(session) => AccessDecision::Authorized(session.clone()),
            SessionState::Invalid => AccessDecision::InvalidSession,
            SessionState::Absent if self.require_auth => AccessDecision::Unauthenticated,
            SessionState::Absent => AccessDecision::Anonymous,
        }
    }

    /// Refresh the session and build the user context. `None` means the session
    /// was invalidated after it was resolved.
    pub async fn admit(&self, session: &Session) -> Result<Option<AuthUser>, SessionError> {
        if !self.registry.touch(&session.session_id).await? {
            debug!("Session of {} invalidated mid-request", session.principal.id);
            return Ok(None);
        }

        Ok(Some(AuthUser {
            principal: Arc::clone(&session.principal),
            session_id: session.session_id.clone(),
            csrf_token: session.csrf_token.clone(),
        }))
    }
}
