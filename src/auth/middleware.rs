/// Security Pipeline
///
/// Every request passes through an ordered list of stages before it reaches the
/// application: CSRF guard, logout, login-flow permit, access gate. Each stage can
/// hand the request on, let it through without consulting later stages, or answer
/// it directly.
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::auth::cookies::{append_set_cookie, read_cookie};
use crate::auth::gate::{AccessDecision, AccessGate, SessionState};
use crate::auth::{AuthError, AuthManager};
use crate::error::ErrorResponseBuilder;
use crate::middleware::request_id_of;
use crate::security::CsrfGuard;

/// What a stage did with the request
pub enum StageOutcome {
    /// Hand the request to the next stage
    Continue(Request),
    /// Skip the remaining stages and run the application
    Permit(Request),
    /// Answer without running the application
    Respond(Response),
}

/// Per-request data resolved once before the stages run
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Session id presented in the session cookie
    pub session_id: Option<String>,
    pub session: SessionState,
    /// Value of the CSRF cookie, if the client sent one
    pub csrf_cookie: Option<String>,
}

impl RequestContext {
    pub fn principal_id(&self) -> Option<String> {
        self.session.session().map(|s| s.principal.id.clone())
    }

    /// Token a mutating request has to echo
    pub fn expected_csrf_token(&self) -> Option<&str> {
        match self.session.session() {
            Some(session) => Some(&session.csrf_token),
            None => self.csrf_cookie.as_deref(),
        }
    }
}

#[async_trait]
pub trait SecurityStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(
        &self,
        ctx: &mut RequestContext,
        req: Request,
    ) -> Result<StageOutcome, AuthError>;
}

/// 302 to a location
pub fn redirect_to(location: &str) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(e) => warn!("Redirect target is not a valid header value: {}", e),
    }
    response
}

/// Rejects mutating requests that do not echo the expected token
pub struct CsrfStage {
    manager: Arc<AuthManager>,
}

#[async_trait]
impl SecurityStage for CsrfStage {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn apply(
        &self,
        ctx: &mut RequestContext,
        req: Request,
    ) -> Result<StageOutcome, AuthError> {
        if !CsrfGuard::requires_protection(req.method()) {
            return Ok(StageOutcome::Continue(req));
        }

        let guard = self.manager.csrf_guard();
        let (req, presented) = guard.extract_token(req).await;

        if let Err(e) = guard.verify(ctx.expected_csrf_token(), presented.as_ref()) {
            warn!(
                "CSRF check failed for {} {}: {}",
                req.method(),
                req.uri().path(),
                e
            );
            self.manager
                .auditor()
                .log_csrf_violation(
                    ctx.principal_id(),
                    req.method().as_str(),
                    req.uri().path(),
                    &e.to_string(),
                )
                .await;
            return Err(e.into());
        }

        Ok(StageOutcome::Continue(req))
    }
}

/// Handles the logout request
pub struct LogoutStage {
    manager: Arc<AuthManager>,
}

#[async_trait]
impl SecurityStage for LogoutStage {
    fn name(&self) -> &'static str {
        "logout"
    }

    async fn apply(
        &self,
        ctx: &mut RequestContext,
        req: Request,
    ) -> Result<StageOutcome, AuthError> {
        if !self
            .manager
            .is_logout_request(req.method(), req.uri().path())
        {
            return Ok(StageOutcome::Continue(req));
        }

        self.manager.logout(ctx.session_id.as_deref()).await?;
        ctx.session = SessionState::Absent;

        let mut response = redirect_to(&self.manager.config().logout_success_redirect);
        for cookie in self.manager.logout_cookies() {
            append_set_cookie(&mut response, &cookie);
        }
        Ok(StageOutcome::Respond(response))
    }
}

/// Lets the login page and OAuth2 endpoints through without a session
pub struct LoginFlowStage {
    manager: Arc<AuthManager>,
}

#[async_trait]
impl SecurityStage for LoginFlowStage {
    fn name(&self) -> &'static str {
        "login_flow"
    }

    async fn apply(
        &self,
        _ctx: &mut RequestContext,
        req: Request,
    ) -> Result<StageOutcome, AuthError> {
        if self.manager.is_login_flow_path(req.uri().path()) {
            Ok(StageOutcome::Permit(req))
        } else {
            Ok(StageOutcome::Continue(req))
        }
    }
}

/// Requires a valid session and publishes the user into request extensions
pub struct AccessGateStage {
    manager: Arc<AuthManager>,
    gate: Arc<AccessGate>,
}

impl AccessGateStage {
    async fn invalid_session(&self, ctx: &mut RequestContext, path: &str) -> StageOutcome {
        ctx.session = SessionState::Invalid;
        self.manager.auditor().log_invalid_session(path).await;

        let cookies = self.manager.cookies();
        let mut response = redirect_to(&self.manager.config().invalid_session_redirect);
        append_set_cookie(&mut response, &cookies.clear(cookies.session_cookie_name()));
        StageOutcome::Respond(response)
    }
}

#[async_trait]
impl SecurityStage for AccessGateStage {
    fn name(&self) -> &'static str {
        "access_gate"
    }

    async fn apply(
        &self,
        ctx: &mut RequestContext,
        mut req: Request,
    ) -> Result<StageOutcome, AuthError> {
        match self.gate.decide(&ctx.session) {
            AccessDecision::Authorized(session) => match self.gate.admit(&session).await? {
                Some(user) => {
                    req.extensions_mut().insert(user);
                    Ok(StageOutcome::Continue(req))
                }
                None => Ok(self.invalid_session(ctx, req.uri().path()).await),
            },
            AccessDecision::Anonymous => Ok(StageOutcome::Continue(req)),
            AccessDecision::InvalidSession => {
                debug!("Stale session presented on {}", req.uri().path());
                Ok(self.invalid_session(ctx, req.uri().path()).await)
            }
            AccessDecision::Unauthenticated => {
                let original = req
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                debug!("Unauthenticated request to {}", original);
                let location = self.manager.entry_point(req.method(), original).await?;
                Ok(StageOutcome::Respond(redirect_to(&location)))
            }
        }
    }
}

/// Ordered security stages plus the per-request context resolution
pub struct SecurityPipeline {
    manager: Arc<AuthManager>,
    gate: Arc<AccessGate>,
    stages: Vec<Box<dyn SecurityStage>>,
}

impl SecurityPipeline {
    pub fn new(manager: Arc<AuthManager>) -> Self {
        let gate = Arc::new(AccessGate::new(
            manager.registry(),
            manager.config().require_auth_on_all_requests,
        ));

        let stages: Vec<Box<dyn SecurityStage>> = vec![
            Box::new(CsrfStage {
                manager: Arc::clone(&manager),
            }),
            Box::new(LogoutStage {
                manager: Arc::clone(&manager),
            }),
            Box::new(LoginFlowStage {
                manager: Arc::clone(&manager),
            }),
            Box::new(AccessGateStage {
                manager: Arc::clone(&manager),
                gate: Arc::clone(&gate),
            }),
        ];

        Self {
            manager,
            gate,
            stages,
        }
    }

    pub fn manager(&self) -> Arc<AuthManager> {
        Arc::clone(&self.manager)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Look up the session once. Cookie values are read before awaiting so the
    /// request itself is not borrowed across the store call.
    async fn resolve_context(
        &self,
        request_id: String,
        session_id: Option<String>,
        csrf_cookie: Option<String>,
    ) -> Result<RequestContext, AuthError> {
        let session = self.gate.resolve(session_id.as_deref()).await?;

        Ok(RequestContext {
            request_id,
            session_id,
            session,
            csrf_cookie,
        })
    }

    /// Run the stages and, if they let the request through, the application
    pub async fn run(&self, req: Request, next: Next) -> Response {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let request_id = request_id_of(&req);

        let cookies = self.manager.cookies();
        let session_id = read_cookie(req.headers(), cookies.session_cookie_name());
        let csrf_cookie = read_cookie(req.headers(), cookies.csrf_cookie_name());

        let mut ctx = match self
            .resolve_context(request_id.clone(), session_id, csrf_cookie)
            .await
        {
            Ok(ctx) => ctx,
            Err(e) => return self.error_response(e, &request_id, &method, &path),
        };

        let mut req = req;
        for stage in &self.stages {
            match stage.apply(&mut ctx, req).await {
                Ok(StageOutcome::Continue(next_req)) => req = next_req,
                Ok(StageOutcome::Permit(next_req)) => {
                    debug!("Stage {} permitted {} {}", stage.name(), method, path);
                    req = next_req;
                    break;
                }
                Ok(StageOutcome::Respond(response)) => {
                    debug!("Stage {} answered {} {}", stage.name(), method, path);
                    return response;
                }
                Err(e) => return self.error_response(e, &ctx.request_id, &method, &path),
            }
        }

        req.extensions_mut().insert(ctx.clone());
        let mut response = next.run(req).await;
        self.reissue_csrf_cookie(&ctx, &mut response);
        response
    }

    /// Hand the session's token back to a client that lost its CSRF cookie
    fn reissue_csrf_cookie(&self, ctx: &RequestContext, response: &mut Response) {
        let prefix = format!("{}=", self.manager.cookies().csrf_cookie_name());
        let already_set = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with(&prefix));

        if let Some(session) = ctx.session.session()
            && !already_set
            && ctx.csrf_cookie.as_deref() != Some(session.csrf_token.as_str())
        {
            debug!("Re-issuing CSRF cookie for {}", session.principal.id);
            append_set_cookie(response, &self.manager.cookies().csrf(&session.csrf_token));
        }
    }

    fn error_response(&self, err: AuthError, request_id: &str, method: &str, path: &str) -> Response {
        if err.is_internal() {
            error!("Security pipeline failed on {} {}: {}", method, path, err);
        }

        ErrorResponseBuilder::from_auth_error(&err)
            .request_id(request_id)
            .method(method)
            .path(path)
            .build()
            .into_response()
    }
}

/// Axum middleware running the security pipeline
pub async fn security_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    req: Request,
    next: Next,
) -> Response {
    pipeline.run(req, next).await
}

/// Error response for authentication failures
#[derive(Debug)]
pub struct AuthErrorResponse {
    pub error: AuthError,
}

impl IntoResponse for AuthErrorResponse {
    fn into_response(self) -> Response {
        ErrorResponseBuilder::from_auth_error(&self.error)
            .build()
            .into_response()
    }
}

impl From<AuthError> for AuthErrorResponse {
    fn from(error: AuthError) -> Self {
        Self { error }
    }
}
