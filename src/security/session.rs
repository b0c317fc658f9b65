// Session Registry
// Tracks live sessions per principal and enforces the concurrent-session policy

use super::audit::SecurityAuditor;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Session-related errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Maximum concurrent sessions exceeded")]
    MaxSessionsExceeded,

    /// The backing store failed; never treated as "not logged in"
    #[error("Session store error: {0}")]
    Store(String),
}

/// Authenticated identity produced by a provider login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// `{provider}:{subject}`, the key the session limit is counted against
    pub id: String,
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,
}

impl Principal {
    pub fn new(provider: impl Into<String>, subject: impl Into<String>) -> Self {
        let provider = provider.into();
        let subject = subject.into();
        Self {
            id: format!("{}:{}", provider, subject),
            provider,
            subject,
            email: None,
            name: None,
            claims: HashMap::new(),
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_claims(mut self, claims: HashMap<String, serde_json::Value>) -> Self {
        self.claims = claims;
        self
    }

    /// Best human-readable label for this principal
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.subject)
    }
}

/// Server-side session record
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub principal: Arc<Principal>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub valid: bool,
    /// Anti-forgery token issued together with the session
    pub csrf_token: String,
}

/// Generate an unguessable URL-safe token from 32 random bytes
pub fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Concurrent-session policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_sessions: usize,
    /// Reject the new login instead of evicting the least recently used session
    pub prevent_login_on_max_sessions: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_sessions: 1,
            prevent_login_on_max_sessions: true,
        }
    }
}

/// Result of looking up a session id
#[derive(Debug, Clone)]
pub enum SessionLookup {
    Valid(Session),
    Invalid,
}

/// Backing storage for session records.
///
/// Implementations must make each call atomic with respect to the others; the
/// registry adds per-principal ordering on top.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    async fn save(&self, session: Session) -> Result<(), SessionError>;

    /// Valid sessions owned by a principal
    async fn active_for(&self, principal_id: &str) -> Result<Vec<Session>, SessionError>;

    /// Delete a session. Returns the removed record, flagged invalid, if it existed.
    async fn remove(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    /// Refresh last access time of a valid session. Returns false if it is not valid.
    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, SessionError>;

    /// Number of stored sessions
    async fn count(&self) -> Result<usize, SessionError>;
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, Session>,
    // principal id -> valid session ids
    by_principal: HashMap<String, Vec<String>>,
}

/// In-process session store
#[derive(Default)]
pub struct MemorySessionStore {
    state: RwLock<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let state = self.state.read().await;
        Ok(state.sessions.get(session_id).cloned())
    }

    async fn save(&self, session: Session) -> Result<(), SessionError> {
        let mut state = self.state.write().await;
        if session.valid {
            let ids = state
                .by_principal
                .entry(session.principal.id.clone())
                .or_default();
            if !ids.contains(&session.session_id) {
                ids.push(session.session_id.clone());
            }
        }
        state.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn active_for(&self, principal_id: &str) -> Result<Vec<Session>, SessionError> {
        let state = self.state.read().await;
        let sessions = state
            .by_principal
            .get(principal_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.sessions.get(id))
                    .filter(|s| s.valid)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(sessions)
    }

    async fn remove(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let mut state = self.state.write().await;
        let Some(mut session) = state.sessions.remove(session_id) else {
            return Ok(None);
        };
        session.valid = false;

        let principal_id = &session.principal.id;
        if let Some(ids) = state.by_principal.get_mut(principal_id) {
            ids.retain(|id| id != session_id);
            if ids.is_empty() {
                state.by_principal.remove(principal_id);
            }
        }

        Ok(Some(session))
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<bool, SessionError> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(session_id) {
            Some(session) if session.valid => {
                session.last_access = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count(&self) -> Result<usize, SessionError> {
        Ok(self.state.read().await.sessions.len())
    }
}

/// Session registry enforcing the concurrent-session policy
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    policy: SessionPolicy,
    /// Serializes create/invalidate per principal
    principal_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    auditor: Arc<SecurityAuditor>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        policy: SessionPolicy,
        auditor: Arc<SecurityAuditor>,
    ) -> Self {
        Self {
            store,
            policy,
            principal_locks: Mutex::new(HashMap::new()),
            auditor,
        }
    }

    /// Registry backed by a fresh in-memory store
    pub fn in_memory(policy: SessionPolicy, auditor: Arc<SecurityAuditor>) -> Self {
        Self::new(Arc::new(MemorySessionStore::new()), policy, auditor)
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    async fn lock_principal(&self, principal_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.principal_locks.lock().await;
            Arc::clone(locks.entry(principal_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Release a principal lock, dropping its map entry once nobody else holds or
    /// waits on it. Clones are only taken under the map lock, so the count is exact.
    async fn unlock_principal(&self, principal_id: &str, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.principal_locks.lock().await;
        if locks
            .get(principal_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(principal_id);
        }
    }

    /// Create a session for a freshly authenticated principal
    pub async fn create(&self, principal: Principal) -> Result<Session, SessionError> {
        let principal_id = principal.id.clone();
        let guard = self.lock_principal(&principal_id).await;
        let result = self.create_locked(principal).await;
        self.unlock_principal(&principal_id, guard).await;
        result
    }

    async fn create_locked(&self, principal: Principal) -> Result<Session, SessionError> {
        let mut active = self.store.active_for(&principal.id).await?;
        if active.len() >= self.policy.max_sessions {
            if self.policy.prevent_login_on_max_sessions {
                warn!(
                    "Rejected login for {}: {} active session(s), limit {}",
                    principal.id,
                    active.len(),
                    self.policy.max_sessions
                );
                self.auditor
                    .log_session_limit(&principal.id, active.len(), self.policy.max_sessions)
                    .await;
                return Err(SessionError::MaxSessionsExceeded);
            }

            // Evict least recently used sessions to make room for the new one
            active.sort_by_key(|s| s.last_access);
            let excess = active.len() + 1 - self.policy.max_sessions;
            for stale in active.iter().take(excess) {
                if self.store.remove(&stale.session_id).await?.is_some() {
                    info!(
                        "Expired oldest session of {} due to concurrent session limit",
                        principal.id
                    );
                    self.auditor
                        .log_logout(&principal.id, "session_limit_eviction")
                        .await;
                }
            }
        }

        let now = Utc::now();
        let session = Session {
            session_id: generate_token(),
            principal: Arc::new(principal),
            created_at: now,
            last_access: now,
            valid: true,
            csrf_token: generate_token(),
        };
        self.store.save(session.clone()).await?;

        info!(
            "Created session for {} (provider: {})",
            session.principal.id, session.principal.provider
        );

        Ok(session)
    }

    /// Look up a session by id
    pub async fn validate(&self, session_id: &str) -> Result<SessionLookup, SessionError> {
        match self.store.load(session_id).await? {
            Some(session) if session.valid => Ok(SessionLookup::Valid(session)),
            Some(_) => {
                debug!("Session id refers to an invalidated session");
                Ok(SessionLookup::Invalid)
            }
            None => {
                debug!("Session id not known to the registry");
                Ok(SessionLookup::Invalid)
            }
        }
    }

    /// Invalidate a session. Unknown or already invalid ids are a no-op.
    pub async fn invalidate(&self, session_id: &str) -> Result<(), SessionError> {
        let Some(existing) = self.store.load(session_id).await? else {
            return Ok(());
        };
        if !existing.valid {
            return Ok(());
        }

        let principal_id = existing.principal.id.clone();
        let guard = self.lock_principal(&principal_id).await;
        let removed = self.store.remove(session_id).await;
        self.unlock_principal(&principal_id, guard).await;

        if let Some(session) = removed? {
            info!("Invalidated session for {}", session.principal.id);
            self.auditor.log_logout(&session.principal.id, "logout").await;
        }

        Ok(())
    }

    /// Refresh the last access time. Returns false when the session is not valid.
    pub async fn touch(&self, session_id: &str) -> Result<bool, SessionError> {
        self.store.touch(session_id, Utc::now()).await
    }

    /// Valid sessions currently held by a principal
    pub async fn sessions_for(&self, principal_id: &str) -> Result<Vec<Session>, SessionError> {
        self.store.active_for(principal_id).await
    }

    /// Sessions currently held in the store
    pub async fn session_count(&self) -> Result<usize, SessionError> {
        self.store.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_registry(policy: SessionPolicy) -> SessionRegistry {
        SessionRegistry::in_memory(policy, Arc::new(SecurityAuditor::new()))
    }

    fn alice() -> Principal {
        Principal::new("github", "alice").with_email(Some("alice@example.com".to_string()))
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn load(&self, _: &str) -> Result<Option<Session>, SessionError> {
            Err(SessionError::Store("connection refused".to_string()))
        }
        async fn save(&self, _: Session) -> Result<(), SessionError> {
            Err(SessionError::Store("connection refused".to_string()))
        }
        async fn active_for(&self, _: &str) -> Result<Vec<Session>, SessionError> {
            Err(SessionError::Store("connection refused".to_string()))
        }
        async fn remove(&self, _: &str) -> Result<Option<Session>, SessionError> {
            Err(SessionError::Store("connection refused".to_string()))
        }
        async fn touch(&self, _: &str, _: DateTime<Utc>) -> Result<bool, SessionError> {
            Err(SessionError::Store("connection refused".to_string()))
        }
        async fn count(&self) -> Result<usize, SessionError> {
            Err(SessionError::Store("connection refused".to_string()))
        }
    }

    #[test]
    fn test_principal_id_and_display_name() {
        let principal = Principal::new("github", "42");
        assert_eq!(principal.id, "github:42");
        assert_eq!(principal.display_name(), "42");

        let principal = principal.with_email(Some("bob@example.com".to_string()));
        assert_eq!(principal.display_name(), "bob@example.com");

        let principal = principal.with_name(Some("Bob".to_string()));
        assert_eq!(principal.display_name(), "Bob");
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }

    #[tokio::test]
    async fn test_create_and_validate_session() {
        let registry = create_test_registry(SessionPolicy::default());

        let session = registry.create(alice()).await.unwrap();
        assert!(session.valid);
        assert_ne!(session.session_id, session.csrf_token);

        match registry.validate(&session.session_id).await.unwrap() {
            SessionLookup::Valid(found) => {
                assert_eq!(found.principal.id, "github:alice");
                assert_eq!(found.csrf_token, session.csrf_token);
            }
            SessionLookup::Invalid => panic!("fresh session should be valid"),
        }
    }

    #[tokio::test]
    async fn test_unknown_session_is_invalid() {
        let registry = create_test_registry(SessionPolicy::default());
        let lookup = registry.validate("no-such-session").await.unwrap();
        assert!(matches!(lookup, SessionLookup::Invalid));
    }

    #[tokio::test]
    async fn test_second_login_rejected_without_evicting_first() {
        let registry = create_test_registry(SessionPolicy::default());

        let first = registry.create(alice()).await.unwrap();
        let second = registry.create(alice()).await;
        assert!(matches!(second, Err(SessionError::MaxSessionsExceeded)));

        // The first session is untouched
        assert!(matches!(
            registry.validate(&first.session_id).await.unwrap(),
            SessionLookup::Valid(_)
        ));
        assert_eq!(registry.sessions_for("github:alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_limit_is_per_principal() {
        let registry = create_test_registry(SessionPolicy::default());

        registry.create(alice()).await.unwrap();
        let bob = registry.create(Principal::new("github", "bob")).await;
        assert!(bob.is_ok());
    }

    #[tokio::test]
    async fn test_login_allowed_again_after_invalidation() {
        let registry = create_test_registry(SessionPolicy::default());

        let first = registry.create(alice()).await.unwrap();
        registry.invalidate(&first.session_id).await.unwrap();

        let second = registry.create(alice()).await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert!(matches!(
            registry.validate(&first.session_id).await.unwrap(),
            SessionLookup::Invalid
        ));
    }

    #[tokio::test]
    async fn test_eviction_when_login_not_prevented() {
        let registry = create_test_registry(SessionPolicy {
            max_sessions: 1,
            prevent_login_on_max_sessions: false,
        });

        let first = registry.create(alice()).await.unwrap();
        let second = registry.create(alice()).await.unwrap();

        assert!(matches!(
            registry.validate(&first.session_id).await.unwrap(),
            SessionLookup::Invalid
        ));
        assert!(matches!(
            registry.validate(&second.session_id).await.unwrap(),
            SessionLookup::Valid(_)
        ));
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let registry = create_test_registry(SessionPolicy::default());

        let session = registry.create(alice()).await.unwrap();
        registry.invalidate(&session.session_id).await.unwrap();
        registry.invalidate(&session.session_id).await.unwrap();
        registry.invalidate("never-issued").await.unwrap();

        assert!(matches!(
            registry.validate(&session.session_id).await.unwrap(),
            SessionLookup::Invalid
        ));
        assert!(registry.sessions_for("github:alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_touch_refreshes_last_access() {
        let registry = create_test_registry(SessionPolicy::default());

        let session = registry.create(alice()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(registry.touch(&session.session_id).await.unwrap());

        let SessionLookup::Valid(found) = registry.validate(&session.session_id).await.unwrap()
        else {
            panic!("session should be valid");
        };
        assert!(found.last_access > session.last_access);
        assert_eq!(found.csrf_token, session.csrf_token);

        registry.invalidate(&session.session_id).await.unwrap();
        assert!(!registry.touch(&session.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidated_sessions_leave_the_store() {
        let registry = create_test_registry(SessionPolicy::default());

        for _ in 0..20 {
            let session = registry.create(alice()).await.unwrap();
            registry.invalidate(&session.session_id).await.unwrap();
        }
        assert_eq!(registry.session_count().await.unwrap(), 0);

        // Evicted sessions are dropped as well
        let registry = create_test_registry(SessionPolicy {
            max_sessions: 1,
            prevent_login_on_max_sessions: false,
        });
        registry.create(alice()).await.unwrap();
        registry.create(alice()).await.unwrap();
        assert_eq!(registry.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_principal_locks_are_released() {
        let registry = create_test_registry(SessionPolicy::default());

        let session = registry.create(alice()).await.unwrap();
        let _ = registry.create(alice()).await;
        registry.create(Principal::new("github", "bob")).await.unwrap();
        assert!(registry.principal_locks.lock().await.is_empty());

        registry.invalidate(&session.session_id).await.unwrap();
        assert!(registry.principal_locks.lock().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_logins_keep_one_session() {
        let registry = Arc::new(create_test_registry(SessionPolicy::default()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.create(alice()).await }));
        }

        let mut created = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(SessionError::MaxSessionsExceeded) => rejected += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(rejected, 15);
        assert_eq!(registry.sessions_for("github:alice").await.unwrap().len(), 1);
        assert!(registry.principal_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_distinguishable() {
        let registry = SessionRegistry::new(
            Arc::new(FailingStore),
            SessionPolicy::default(),
            Arc::new(SecurityAuditor::new()),
        );

        assert!(matches!(
            registry.validate("anything").await,
            Err(SessionError::Store(_))
        ));
        assert!(matches!(
            registry.create(alice()).await,
            Err(SessionError::Store(_))
        ));
    }
}
