// Authentication Module
// OAuth2 login flow, access gate and the security pipeline around the application

pub mod config;
pub mod cookies;
pub mod error;
pub mod gate;
pub mod manager;
pub mod middleware;
pub mod providers;
pub mod routes;
pub mod state;

pub use config::{CookieConfig, SameSitePolicy, SecurityConfig, SessionCreationPolicy};
pub use cookies::{CookieFactory, read_cookie};
pub use error::AuthError;
pub use gate::{AccessDecision, AccessGate, AuthUser, SessionState};
pub use manager::{AuthManager, LoginOutcome, ProviderLink};
pub use middleware::{
    AuthErrorResponse, RequestContext, SecurityPipeline, SecurityStage, StageOutcome,
    security_middleware,
};
pub use providers::{
    AuthorizationRequest, OAuth2Provider, OAuth2ProviderConfig, OAuth2TokenResponse,
    OAuth2UserInfo, ProviderFactory, StandardOAuth2Provider,
};
pub use routes::create_auth_router;
pub use state::{PendingAuthorization, PendingAuthorizations};
