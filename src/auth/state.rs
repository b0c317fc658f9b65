/// Pending Authorization Store
///
/// Remembers every authorization redirect handed to a client until the provider
/// sends the browser back. Each entry is keyed by the OAuth2 `state` parameter,
/// carries the PKCE verifier (RFC 7636, S256) and expires after ten minutes.
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::AuthError;
use super::providers::AuthorizationRequest;
use crate::security::generate_token;

/// How long a client may take to come back from the provider
pub const PENDING_AUTHORIZATION_TTL_MINUTES: i64 = 10;

/// S256 challenge for a PKCE verifier
pub fn code_challenge(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Authorization in flight between redirect and callback
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub provider: String,
    pub code_verifier: String,
    /// Where to send the browser once the session exists
    pub redirect_after_login: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PendingAuthorizations {
    entries: RwLock<HashMap<String, PendingAuthorization>>,
    ttl: Duration,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new(Duration::minutes(PENDING_AUTHORIZATION_TTL_MINUTES))
    }
}

impl PendingAuthorizations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Record a new authorization and return the parameters for the redirect
    pub async fn issue(
        &self,
        provider: &str,
        redirect_after_login: Option<String>,
    ) -> AuthorizationRequest {
        let code_verifier = generate_token();
        let request = AuthorizationRequest {
            state: generate_token(),
            code_challenge: code_challenge(&code_verifier),
        };

        let now = Utc::now();
        let ttl = self.ttl;
        let mut entries = self.entries.write().await;
        entries.retain(|_, pending| now - pending.created_at < ttl);
        entries.insert(
            request.state.clone(),
            PendingAuthorization {
                provider: provider.to_string(),
                code_verifier,
                redirect_after_login,
                created_at: now,
            },
        );

        request
    }

    /// Take the authorization for a callback. The entry is removed whether or not
    /// it turns out to be usable, so a state value works at most once.
    pub async fn consume(
        &self,
        state: &str,
        provider: &str,
    ) -> Result<PendingAuthorization, AuthError> {
        let pending = self
            .entries
            .write()
            .await
            .remove(state)
            .ok_or(AuthError::InvalidState)?;

        if pending.provider != provider {
            debug!(
                "State issued for {} presented on {} callback",
                pending.provider, provider
            );
            return Err(AuthError::InvalidState);
        }

        if Utc::now() - pending.created_at >= self.ttl {
            debug!("Authorization state for {} expired", provider);
            return Err(AuthError::InvalidState);
        }

        Ok(pending)
    }

    /// Drop expired entries, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, pending| now - pending.created_at < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
