use axum::{
    Json, Router,
    extract::Request,
    middleware::{from_fn, from_fn_with_state},
    response::{Html, IntoResponse},
    routing::get,
};
use axum_server::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod security;

use auth::{AuthManager, AuthUser, SecurityPipeline, create_auth_router, security_middleware};
use config::AppConfig;

/// Build the authentication manager and register every configured provider
pub fn build_auth_manager(config: &AppConfig) -> anyhow::Result<Arc<AuthManager>> {
    config.validate()?;

    let mut manager = AuthManager::with_memory_store(config.security.clone())?;
    for (name, provider_config) in &config.providers {
        manager.register_provider(name, provider_config.clone())?;
    }

    if config.providers.is_empty() {
        tracing::warn!("No OAuth2 providers configured; nobody will be able to sign in");
    }

    Ok(Arc::new(manager))
}

/// Wrap application routes with the login flow and the security pipeline.
///
/// Layers, outermost first: request id, HTTP tracing, security pipeline.
pub fn build_app(manager: Arc<AuthManager>, app_routes: Router) -> Router {
    let pipeline = Arc::new(SecurityPipeline::new(Arc::clone(&manager)));
    debug!("Security stages: {:?}", pipeline.stage_names());

    app_routes
        .merge(create_auth_router(manager))
        .layer(from_fn_with_state(pipeline, security_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(middleware::request_id_middleware))
}

async fn home(user: AuthUser) -> Html<String> {
    let name = html_escape::encode_text(user.principal.display_name()).into_owned();
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Home</title></head>
<body>
    <p>Signed in as {}</p>
    <form method="post" action="/logout">
        <input type="hidden" name="_csrf" value="{}">
        <button type="submit">Sign out</button>
    </form>
</body>
</html>"#,
        name,
        html_escape::encode_double_quoted_attribute(&user.csrf_token)
    ))
}

async fn dashboard(user: AuthUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "principal": user.principal.id,
        "provider": user.principal.provider,
        "email": user.principal.email,
        "name": user.principal.display_name(),
    }))
}

async fn update_dashboard(user: AuthUser, req: Request) -> impl IntoResponse {
    info!("{} updated the dashboard via {}", user.id(), req.uri().path());
    Json(serde_json::json!({ "status": "updated", "by": user.principal.id }))
}

/// Protected sample pages served by the bundled binary
pub fn demo_routes() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/dashboard", get(dashboard).post(update_dashboard))
}

/// Starts the web server with custom configuration
pub async fn start_server_with_config(
    config: AppConfig,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let manager = build_auth_manager(&config)?;
    let app = build_app(manager, demo_routes());

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    info!("listening on {}", addr);
    debug!(
        "Session policy - max_sessions: {}, prevent_login: {}",
        config.security.max_sessions, config.security.prevent_login_on_max_sessions
    );

    let server = Server::bind(addr).serve(app.into_make_service());

    tokio::select! {
        res = server => { res? },
        _ = &mut shutdown_rx => { info!("shutdown requested, no longer accepting connections"); }
    }

    Ok(())
}
