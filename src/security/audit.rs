use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecurityEventType {
    AuthenticationAttempt,
    AuthenticationSuccess,
    AuthenticationFailure,
    ConcurrentSessionLimit,
    InvalidSessionPresented,
    CsrfViolation,
    Logout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub user_id: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub details: HashMap<String, String>,
    pub error_message: Option<String>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        severity: SecuritySeverity,
        user_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            severity,
            user_id,
            resource: None,
            action: None,
            details: HashMap::new(),
            error_message: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_detail<K: ToString, V: ToString>(mut self, key: K, value: V) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// Writes security events to the structured log.
#[derive(Clone, Default)]
pub struct SecurityAuditor {}

impl SecurityAuditor {
    pub fn new() -> Self {
        Self {}
    }

    /// Log a security event
    pub async fn log_event(&self, event: SecurityEvent) {
        match event.severity {
            SecuritySeverity::Low => {
                info!(
                    event_id = %event.id,
                    event_type = ?event.event_type,
                    user_id = ?event.user_id,
                    resource = ?event.resource,
                    action = ?event.action,
                    "Security event logged"
                );
            }
            SecuritySeverity::Medium => {
                warn!(
                    event_id = %event.id,
                    event_type = ?event.event_type,
                    user_id = ?event.user_id,
                    resource = ?event.resource,
                    action = ?event.action,
                    error = ?event.error_message,
                    "Security warning logged"
                );
            }
            SecuritySeverity::High => {
                error!(
                    event_id = %event.id,
                    event_type = ?event.event_type,
                    severity = ?event.severity,
                    user_id = ?event.user_id,
                    resource = ?event.resource,
                    action = ?event.action,
                    details = ?event.details,
                    error = ?event.error_message,
                    "High severity security event logged"
                );
            }
        }
    }

    /// Log the start of a provider login
    pub async fn log_auth_attempt(&self, provider: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::AuthenticationAttempt,
            SecuritySeverity::Low,
            None,
        )
        .with_action("login_redirect")
        .with_detail("provider", provider);

        self.log_event(event).await;
    }

    /// Log a completed login
    pub async fn log_auth_success(&self, principal_id: &str, provider: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::AuthenticationSuccess,
            SecuritySeverity::Low,
            Some(principal_id.to_string()),
        )
        .with_action("login_success")
        .with_detail("provider", provider);

        self.log_event(event).await;
    }

    /// Log a failed login
    pub async fn log_auth_failure(&self, attempted_user: Option<String>, provider: &str, reason: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::AuthenticationFailure,
            SecuritySeverity::Medium,
            attempted_user,
        )
        .with_action("login_failure")
        .with_detail("provider", provider)
        .with_error(reason);

        self.log_event(event).await;
    }

    /// Log a login refused by the concurrent session policy
    pub async fn log_session_limit(&self, principal_id: &str, active: usize, limit: usize) {
        let event = SecurityEvent::new(
            SecurityEventType::ConcurrentSessionLimit,
            SecuritySeverity::Medium,
            Some(principal_id.to_string()),
        )
        .with_action("session_create")
        .with_detail("active_sessions", active)
        .with_detail("max_sessions", limit)
        .with_error("Maximum concurrent sessions exceeded");

        self.log_event(event).await;
    }

    /// Log a request that presented an unknown or invalidated session id
    pub async fn log_invalid_session(&self, path: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::InvalidSessionPresented,
            SecuritySeverity::Low,
            None,
        )
        .with_resource(path);

        self.log_event(event).await;
    }

    /// Log a rejected mutating request
    pub async fn log_csrf_violation(
        &self,
        principal_id: Option<String>,
        method: &str,
        path: &str,
        reason: &str,
    ) {
        let event = SecurityEvent::new(
            SecurityEventType::CsrfViolation,
            SecuritySeverity::High,
            principal_id,
        )
        .with_resource(path)
        .with_action(method)
        .with_error(reason);

        self.log_event(event).await;
    }

    /// Log session invalidation
    pub async fn log_logout(&self, principal_id: &str, reason: &str) {
        let event = SecurityEvent::new(
            SecurityEventType::Logout,
            SecuritySeverity::Low,
            Some(principal_id.to_string()),
        )
        .with_action(reason);

        self.log_event(event).await;
    }
}
