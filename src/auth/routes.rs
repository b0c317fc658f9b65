/// Authentication Routes
///
/// HTTP handlers for the login flow: the login page, the redirect to a provider
/// and the provider callback. Logout is handled by the security pipeline.
use crate::auth::cookies::append_set_cookie;
use crate::auth::manager::{AUTHORIZATION_PATH_PREFIX, CALLBACK_PATH_PREFIX, is_local_redirect};
use crate::auth::middleware::redirect_to;
use crate::auth::{AuthError, AuthManager};
use crate::error::{ErrorResponseBuilder, errors};
use crate::middleware::RequestId;
use axum::{
    Extension, Router,
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// OAuth2 callback parameters
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackParams {
    /// Authorization code from provider
    code: Option<String>,

    /// State issued with the authorization redirect
    state: Option<String>,

    /// Error from provider
    error: Option<String>,

    /// Error description from provider
    error_description: Option<String>,
}

/// Authorization redirect parameters
#[derive(Debug, Deserialize)]
pub struct AuthorizationParams {
    /// Local URL to return to after login
    redirect: Option<String>,
}

/// Login page parameters. Flags are present-or-absent (`/login?logout`).
#[derive(Debug, Default, Deserialize)]
pub struct LoginPageParams {
    error: Option<String>,
    logout: Option<String>,
    #[serde(rename = "invalid-session")]
    invalid_session: Option<String>,
    redirect: Option<String>,
}

impl LoginPageParams {
    fn message(&self) -> Option<(&'static str, &'static str)> {
        if self.error.is_some() {
            Some(("error", "Sign in failed. You may already be signed in elsewhere."))
        } else if self.invalid_session.is_some() {
            Some(("warning", "Your session is no longer valid. Please sign in again."))
        } else if self.logout.is_some() {
            Some(("info", "You have been signed out."))
        } else {
            None
        }
    }
}

fn render_login_page(manager: &AuthManager, params: &LoginPageParams) -> String {
    let redirect = params
        .redirect
        .as_deref()
        .filter(|target| is_local_redirect(target));

    let links = manager
        .list_providers()
        .iter()
        .map(|provider| {
            let href = match redirect {
                Some(target) => format!(
                    "{}?redirect={}",
                    provider.href(),
                    urlencoding::encode(target)
                ),
                None => provider.href(),
            };
            format!(
                r#"<li><a href="{}" class="provider provider-{}">Sign in with {}</a></li>"#,
                html_escape::encode_double_quoted_attribute(&href),
                html_escape::encode_double_quoted_attribute(&provider.name),
                html_escape::encode_text(&provider.display_name)
            )
        })
        .collect::<Vec<_>>();

    let providers = if links.is_empty() {
        r#"<p class="empty">No sign-in providers are configured.</p>"#.to_string()
    } else {
        format!("<ul class=\"providers\">\n        {}\n    </ul>", links.join("\n        "))
    };

    let message = params
        .message()
        .map(|(level, text)| format!(r#"<p class="message message-{}">{}</p>"#, level, text))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign In</title>
</head>
<body>
    <h1>Sign In</h1>
    {}
    {}
</body>
</html>"#,
        message, providers
    )
}

/// Login page handler - lists available providers
async fn login_page(
    State(manager): State<Arc<AuthManager>>,
    Query(params): Query<LoginPageParams>,
) -> Html<String> {
    Html(render_login_page(&manager, &params))
}

/// Redirect to a provider's authorization endpoint
async fn start_authorization(
    State(manager): State<Arc<AuthManager>>,
    Path(provider): Path<String>,
    Query(params): Query<AuthorizationParams>,
    request_id: Option<Extension<RequestId>>,
) -> Response {
    let redirect = params.redirect.filter(|target| is_local_redirect(target));

    match manager.start_authorization(&provider, redirect).await {
        Ok(auth_url) => redirect_to(&auth_url),
        Err(AuthError::UnsupportedProvider(_)) => errors::not_found(
            &format!("{}{}", AUTHORIZATION_PATH_PREFIX, provider),
            request_id.as_ref().map_or("unknown", |Extension(id)| id.as_str()),
        )
        .into_response(),
        Err(e) => {
            error!("Could not start authorization with {}: {}", provider, e);
            redirect_to(&manager.config().login_failure_redirect)
        }
    }
}

/// Handle OAuth2 callback from provider
async fn oauth_callback(
    State(manager): State<Arc<AuthManager>>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthCallbackParams>,
    request_id: Option<Extension<RequestId>>,
) -> Response {
    let failure = || redirect_to(&manager.config().login_failure_redirect);

    if let Some(error) = params.error {
        let reason = match params.error_description {
            Some(description) => format!("{} ({})", error, description),
            None => error,
        };
        manager.report_provider_error(&provider, &reason).await;
        return failure();
    }

    let (Some(code), Some(state)) = (params.code, params.state) else {
        manager
            .report_provider_error(&provider, "callback without code or state")
            .await;
        return failure();
    };

    match manager.handle_callback(&provider, &code, &state).await {
        Ok(outcome) => {
            info!(
                "{} signed in via {}",
                outcome.session.principal.display_name(),
                provider
            );
            let cookies = manager.cookies();
            let mut response = redirect_to(&outcome.redirect_to);
            append_set_cookie(&mut response, &cookies.session(&outcome.session.session_id));
            append_set_cookie(&mut response, &cookies.csrf(&outcome.session.csrf_token));
            response
        }
        Err(e) if AuthManager::is_login_failure(&e) => failure(),
        Err(e) => {
            error!("Login via {} failed internally: {}", provider, e);
            ErrorResponseBuilder::from_auth_error(&e)
                .request_id(
                    request_id
                        .as_ref()
                        .map_or("unknown", |Extension(id)| id.as_str()),
                )
                .path(format!("{}{}", CALLBACK_PATH_PREFIX, provider))
                .build()
                .into_response()
        }
    }
}

/// Create the login-flow router
pub fn create_auth_router(manager: Arc<AuthManager>) -> Router {
    let login_path = manager
        .config()
        .login_page_path
        .split_once('?')
        .map_or(manager.config().login_page_path.clone(), |(path, _)| {
            path.to_string()
        });

    Router::new()
        .route(&login_path, get(login_page))
        .route(
            &format!("{}{{provider}}", AUTHORIZATION_PATH_PREFIX),
            get(start_authorization),
        )
        .route(
            &format!("{}{{provider}}", CALLBACK_PATH_PREFIX),
            get(oauth_callback),
        )
        .with_state(manager)
}
