// Security Policy Configuration
// One explicit struct for every option the enforcer recognizes

use axum::http::{HeaderName, Method};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use super::error::AuthError;
use crate::security::SessionPolicy;

/// Session and access policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Every request outside the login flow needs a valid session
    pub require_auth_on_all_requests: bool,

    /// Maximum valid sessions per principal
    pub max_sessions: usize,

    /// Refuse new logins at the limit instead of evicting the oldest session
    pub prevent_login_on_max_sessions: bool,

    pub session_creation_policy: SessionCreationPolicy,

    /// HttpOnly flag for the CSRF cookie. Off so client script can echo the token.
    pub csrf_cookie_http_only: bool,

    pub logout_path: String,

    /// HTTP method accepted by the logout endpoint
    pub logout_method: String,

    pub invalid_session_redirect: String,
    pub logout_success_redirect: String,
    pub login_failure_redirect: String,
    pub login_page_path: String,

    pub cookies_to_clear_on_logout: BTreeSet<String>,

    pub csrf_header_name: String,
    pub csrf_parameter_name: String,

    pub cookie: CookieConfig,
}

impl SecurityConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.max_sessions == 0 {
            return Err(invalid("security.max_sessions", "must be at least 1"));
        }

        if self.session_creation_policy != SessionCreationPolicy::IfRequired {
            return Err(invalid(
                "security.session_creation_policy",
                "only if_required is supported; sessions are created at login",
            ));
        }

        for (key, path) in [
            ("security.logout_path", &self.logout_path),
            ("security.invalid_session_redirect", &self.invalid_session_redirect),
            ("security.logout_success_redirect", &self.logout_success_redirect),
            ("security.login_failure_redirect", &self.login_failure_redirect),
            ("security.login_page_path", &self.login_page_path),
        ] {
            if !path.starts_with('/') {
                return Err(invalid(key, "must be an absolute path starting with '/'"));
            }
        }

        self.logout_method()?;
        self.csrf_header()?;

        if self.csrf_parameter_name.is_empty() {
            return Err(invalid("security.csrf_parameter_name", "cannot be empty"));
        }

        if self.cookies_to_clear_on_logout.iter().any(|c| c.is_empty()) {
            return Err(invalid(
                "security.cookies_to_clear_on_logout",
                "cookie names cannot be empty",
            ));
        }

        self.cookie.validate()?;

        Ok(())
    }

    pub fn logout_method(&self) -> Result<Method, AuthError> {
        Method::from_str(&self.logout_method.to_uppercase())
            .map_err(|_| invalid("security.logout_method", "not a valid HTTP method"))
    }

    pub fn csrf_header(&self) -> Result<HeaderName, AuthError> {
        HeaderName::from_str(&self.csrf_header_name)
            .map_err(|_| invalid("security.csrf_header_name", "not a valid header name"))
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_sessions: self.max_sessions,
            prevent_login_on_max_sessions: self.prevent_login_on_max_sessions,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_auth_on_all_requests: true,
            max_sessions: 1,
            prevent_login_on_max_sessions: true,
            session_creation_policy: SessionCreationPolicy::IfRequired,
            csrf_cookie_http_only: false,
            logout_path: "/logout".to_string(),
            logout_method: "POST".to_string(),
            invalid_session_redirect: "/login?invalid-session=true".to_string(),
            logout_success_redirect: "/login?logout".to_string(),
            login_failure_redirect: "/login?error".to_string(),
            login_page_path: "/login".to_string(),
            cookies_to_clear_on_logout: ["JSESSIONID", "XSRF-TOKEN"]
                .into_iter()
                .map(String::from)
                .collect(),
            csrf_header_name: "X-XSRF-TOKEN".to_string(),
            csrf_parameter_name: "_csrf".to_string(),
            cookie: CookieConfig::default(),
        }
    }
}

/// When the enforcer creates sessions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionCreationPolicy {
    Always,
    IfRequired,
    Never,
    Stateless,
}

/// Cookie settings shared by the session and CSRF cookies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    pub session_cookie_name: String,
    pub csrf_cookie_name: String,

    /// Secure flag (HTTPS only) - should be true in production
    pub secure: bool,

    pub same_site: SameSitePolicy,

    pub path: String,
}

impl CookieConfig {
    fn validate(&self) -> Result<(), AuthError> {
        if self.session_cookie_name.is_empty() {
            return Err(invalid("security.cookie.session_cookie_name", "cannot be empty"));
        }

        if self.csrf_cookie_name.is_empty() {
            return Err(invalid("security.cookie.csrf_cookie_name", "cannot be empty"));
        }

        if self.session_cookie_name == self.csrf_cookie_name {
            return Err(invalid(
                "security.cookie.csrf_cookie_name",
                "must differ from the session cookie name",
            ));
        }

        if self.same_site == SameSitePolicy::None && !self.secure {
            return Err(invalid(
                "security.cookie.same_site",
                "SameSite=None requires secure cookies",
            ));
        }

        Ok(())
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            session_cookie_name: "JSESSIONID".to_string(),
            csrf_cookie_name: "XSRF-TOKEN".to_string(),
            secure: false, // Development default
            same_site: SameSitePolicy::Lax,
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl SameSitePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSitePolicy::Strict => "Strict",
            SameSitePolicy::Lax => "Lax",
            SameSitePolicy::None => "None",
        }
    }
}

fn invalid(key: &str, reason: &str) -> AuthError {
    AuthError::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
