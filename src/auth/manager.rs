/// Authentication Manager
///
/// Central orchestrator for the login flow, coordinating providers, the pending
/// authorization store and the session registry.
use axum::http::Method;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{
    AuthError, CookieFactory, OAuth2Provider, OAuth2ProviderConfig, PendingAuthorizations,
    ProviderFactory, SecurityConfig,
};
use crate::security::{CsrfGuard, Principal, SecurityAuditor, Session, SessionError, SessionRegistry};

/// Path prefix of the redirect-to-provider endpoint
pub const AUTHORIZATION_PATH_PREFIX: &str = "/oauth2/authorization/";

/// Path prefix of the provider callback endpoint
pub const CALLBACK_PATH_PREFIX: &str = "/login/oauth2/code/";

/// Provider entry for the login page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLink {
    pub name: String,
    pub display_name: String,
}

impl ProviderLink {
    pub fn href(&self) -> String {
        format!("{}{}", AUTHORIZATION_PATH_PREFIX, self.name)
    }
}

/// A finished login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    /// Where the browser goes next
    pub redirect_to: String,
}

/// Central authentication manager
pub struct AuthManager {
    config: SecurityConfig,
    providers: BTreeMap<String, Arc<dyn OAuth2Provider>>,
    registry: Arc<SessionRegistry>,
    pending: PendingAuthorizations,
    auditor: Arc<SecurityAuditor>,
    cookies: CookieFactory,
    csrf: CsrfGuard,
    logout_method: Method,
    /// Paths reachable without a session
    login_flow_paths: BTreeSet<String>,
}

/// Path component of a configured redirect target
fn path_of(target: &str) -> &str {
    target.split_once('?').map_or(target, |(path, _)| path)
}

/// Only same-origin, path-absolute targets are remembered for after login
pub(crate) fn is_local_redirect(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

impl AuthManager {
    /// Create a new authentication manager
    pub fn new(
        config: SecurityConfig,
        registry: Arc<SessionRegistry>,
        auditor: Arc<SecurityAuditor>,
    ) -> Result<Self, AuthError> {
        config.validate()?;

        let csrf = CsrfGuard::new(config.csrf_header()?, config.csrf_parameter_name.clone());
        let logout_method = config.logout_method()?;
        let cookies = CookieFactory::new(&config);

        let login_flow_paths = [
            &config.login_page_path,
            &config.invalid_session_redirect,
            &config.logout_success_redirect,
            &config.login_failure_redirect,
        ]
        .into_iter()
        .map(|target| path_of(target).to_string())
        .collect();

        Ok(Self {
            config,
            providers: BTreeMap::new(),
            registry,
            pending: PendingAuthorizations::default(),
            auditor,
            cookies,
            csrf,
            logout_method,
            login_flow_paths,
        })
    }

    /// Manager with an in-memory session registry built from the config's policy
    pub fn with_memory_store(config: SecurityConfig) -> Result<Self, AuthError> {
        let auditor = Arc::new(SecurityAuditor::new());
        let registry = Arc::new(SessionRegistry::in_memory(
            config.session_policy(),
            Arc::clone(&auditor),
        ));
        Self::new(config, registry, auditor)
    }

    /// Register an OAuth2 provider from configuration
    pub fn register_provider(
        &mut self,
        provider_name: &str,
        provider_config: OAuth2ProviderConfig,
    ) -> Result<(), AuthError> {
        let provider = ProviderFactory::create_provider(provider_name, provider_config)?;
        self.add_provider(provider_name, Arc::from(provider));
        Ok(())
    }

    /// Register an already constructed provider
    pub fn add_provider(&mut self, provider_name: &str, provider: Arc<dyn OAuth2Provider>) {
        info!("Registered OAuth2 provider: {}", provider_name);
        self.providers.insert(provider_name.to_string(), provider);
    }

    pub fn get_provider(&self, provider_name: &str) -> Option<Arc<dyn OAuth2Provider>> {
        self.providers.get(provider_name).cloned()
    }

    /// Registered providers in name order
    pub fn list_providers(&self) -> Vec<ProviderLink> {
        self.providers
            .iter()
            .map(|(name, provider)| ProviderLink {
                name: name.clone(),
                display_name: provider.display_name(),
            })
            .collect()
    }

    /// Whether the path belongs to the login flow and needs no session
    pub fn is_login_flow_path(&self, path: &str) -> bool {
        self.login_flow_paths.contains(path)
            || path
                .strip_prefix(AUTHORIZATION_PATH_PREFIX)
                .is_some_and(|name| !name.is_empty() && !name.contains('/'))
            || path
                .strip_prefix(CALLBACK_PATH_PREFIX)
                .is_some_and(|name| !name.is_empty() && !name.contains('/'))
    }

    /// Whether the request is the logout request
    pub fn is_logout_request(&self, method: &Method, path: &str) -> bool {
        *method == self.logout_method && path == self.config.logout_path
    }

    /// Where an unauthenticated request is sent.
    ///
    /// With a single provider the browser goes straight to it; otherwise it lands on
    /// the login page, which carries the original target along in `?redirect=`.
    /// `original_uri` is remembered for GET requests only.
    pub async fn entry_point(
        &self,
        method: &Method,
        original_uri: &str,
    ) -> Result<String, AuthError> {
        let saved = (*method == Method::GET && is_local_redirect(original_uri))
            .then(|| original_uri.to_string());

        match self.providers.keys().next() {
            Some(only) if self.providers.len() == 1 => {
                let only = only.clone();
                self.start_authorization(&only, saved).await
            }
            _ => Ok(match saved {
                Some(target) if target != "/" => format!(
                    "{}?redirect={}",
                    self.config.login_page_path,
                    urlencoding::encode(&target)
                ),
                _ => self.config.login_page_path.clone(),
            }),
        }
    }

    /// Record a pending authorization and build the provider redirect
    pub async fn start_authorization(
        &self,
        provider_name: &str,
        redirect_after_login: Option<String>,
    ) -> Result<String, AuthError> {
        let provider = self
            .get_provider(provider_name)
            .ok_or_else(|| AuthError::UnsupportedProvider(provider_name.to_string()))?;

        let request = self
            .pending
            .issue(provider_name, redirect_after_login)
            .await;
        let auth_url = provider.authorization_url(&request)?;

        self.auditor.log_auth_attempt(provider_name).await;
        debug!("Redirecting to {} for authorization", provider_name);

        Ok(auth_url)
    }

    /// Complete a login from the provider callback.
    ///
    /// `MaxSessionsExceeded` leaves every existing session untouched.
    pub async fn handle_callback(
        &self,
        provider_name: &str,
        code: &str,
        state: &str,
    ) -> Result<LoginOutcome, AuthError> {
        match self.complete_login(provider_name, code, state).await {
            Ok(outcome) => {
                self.auditor
                    .log_auth_success(&outcome.session.principal.id, provider_name)
                    .await;
                Ok(outcome)
            }
            Err(e) => {
                warn!("Login via {} failed: {}", provider_name, e);
                self.auditor
                    .log_auth_failure(None, provider_name, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn complete_login(
        &self,
        provider_name: &str,
        code: &str,
        state: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let pending = self.pending.consume(state, provider_name).await?;

        let provider = self
            .get_provider(provider_name)
            .ok_or_else(|| AuthError::UnsupportedProvider(provider_name.to_string()))?;

        let tokens = provider.exchange_code(code, &pending.code_verifier).await?;
        let user_info = provider.get_user_info(&tokens).await?;

        let principal = Principal::new(provider_name, user_info.subject)
            .with_email(user_info.email)
            .with_name(user_info.name)
            .with_claims(user_info.raw_data);

        let session = self.registry.create(principal).await?;

        Ok(LoginOutcome {
            session,
            redirect_to: pending
                .redirect_after_login
                .unwrap_or_else(|| "/".to_string()),
        })
    }

    /// Record a provider-reported failure (`error=` on the callback)
    pub async fn report_provider_error(&self, provider_name: &str, error: &str) {
        warn!("Provider {} returned error: {}", provider_name, error);
        self.auditor
            .log_auth_failure(None, provider_name, &format!("provider error: {}", error))
            .await;
    }

    /// Invalidate the session behind a logout request, if there is one
    pub async fn logout(&self, session_id: Option<&str>) -> Result<(), AuthError> {
        if let Some(session_id) = session_id {
            self.registry.invalidate(session_id).await?;
        }
        Ok(())
    }

    /// Deletion directives emitted on logout
    pub fn logout_cookies(&self) -> Vec<String> {
        self.config
            .cookies_to_clear_on_logout
            .iter()
            .map(|name| self.cookies.clear(name))
            .collect()
    }

    /// Whether a login failure should be reported as a redirect rather than a 500
    pub fn is_login_failure(error: &AuthError) -> bool {
        !matches!(
            error,
            AuthError::Session(SessionError::Store(_)) | AuthError::Internal(_)
        )
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn auditor(&self) -> Arc<SecurityAuditor> {
        Arc::clone(&self.auditor)
    }

    pub fn cookies(&self) -> &CookieFactory {
        &self.cookies
    }

    pub fn csrf_guard(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn pending(&self) -> &PendingAuthorizations {
        &self.pending
    }
}
