#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use sessiongate::auth::{
    AuthError, AuthManager, AuthorizationRequest, OAuth2Provider, OAuth2TokenResponse,
    OAuth2UserInfo, SecurityConfig,
};
use sessiongate::{build_app, demo_routes};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

/// Identity provider stand-in: the authorization code is the user's subject
pub struct FakeProvider {
    name: String,
}

impl FakeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl OAuth2Provider for FakeProvider {
    fn display_name(&self) -> String {
        format!("Fake {}", self.name)
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<String, AuthError> {
        Ok(format!(
            "https://{}.idp.test/authorize?response_type=code&state={}&code_challenge={}",
            self.name, request.state, request.code_challenge
        ))
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<OAuth2TokenResponse, AuthError> {
        if code == "rejected" || code_verifier.is_empty() {
            return Err(AuthError::CodeExchangeFailed("invalid_grant".to_string()));
        }
        Ok(OAuth2TokenResponse {
            access_token: code.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: None,
            id_token: None,
            scope: None,
        })
    }

    async fn get_user_info(
        &self,
        tokens: &OAuth2TokenResponse,
    ) -> Result<OAuth2UserInfo, AuthError> {
        Ok(OAuth2UserInfo {
            subject: tokens.access_token.clone(),
            email: Some(format!("{}@example.com", tokens.access_token)),
            name: None,
            raw_data: HashMap::new(),
        })
    }
}

/// Cookies handed out by a successful login
#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub session_id: String,
    pub csrf_token: String,
}

impl LoggedIn {
    pub fn cookie_header(&self) -> String {
        format!("JSESSIONID={}; XSRF-TOKEN={}", self.session_id, self.csrf_token)
    }
}

/// In-process application driven with `oneshot`
pub struct TestApp {
    pub app: Router,
    pub manager: Arc<AuthManager>,
}

impl TestApp {
    /// Default policy with a single provider named `idp`
    pub fn new() -> Self {
        Self::with_config(SecurityConfig::default(), &["idp"])
    }

    pub fn with_config(config: SecurityConfig, providers: &[&str]) -> Self {
        let mut manager = AuthManager::with_memory_store(config).expect("valid test config");
        for name in providers {
            manager.add_provider(name, Arc::new(FakeProvider::new(name)));
        }
        let manager = Arc::new(manager);

        Self {
            app: build_app(Arc::clone(&manager), demo_routes()),
            manager,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str, cookies: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookies) = cookies {
            builder = builder.header(header::COOKIE, cookies);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Run the redirect and callback for `user` through `provider`
    pub async fn login_via(&self, provider: &str, user: &str) -> Response<Body> {
        let response = self
            .get(&format!("/oauth2/authorization/{}", provider), None)
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let state = query_param(&location(&response), "state").expect("state parameter");
        self.get(
            &format!("/login/oauth2/code/{}?code={}&state={}", provider, user, state),
            None,
        )
        .await
    }

    /// Log `user` in through the `idp` provider, expecting success
    pub async fn login(&self, user: &str) -> LoggedIn {
        let response = self.login_via("idp", user).await;
        assert_eq!(response.status(), StatusCode::FOUND, "login should redirect");

        LoggedIn {
            session_id: cookie_value(&response, "JSESSIONID").expect("session cookie"),
            csrf_token: cookie_value(&response, "XSRF-TOKEN").expect("csrf cookie"),
        }
    }
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(url)
        .or_else(|_| url::Url::parse("http://localhost").and_then(|base| base.join(url)))
        .ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(String::from)
        .collect()
}

/// Value of a cookie set by the response (empty for deletions)
pub fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    set_cookies(response).iter().find_map(|cookie| {
        let rest = cookie.strip_prefix(&prefix)?;
        Some(rest.split(';').next().unwrap_or_default().to_string())
    })
}

/// The `Set-Cookie` line for a cookie name
pub fn set_cookie_line(response: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    set_cookies(response)
        .into_iter()
        .find(|cookie| cookie.starts_with(&prefix))
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("JSON body")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
