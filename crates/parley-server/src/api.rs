//! HTTP status API served next to the chat listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::constants::PROTOCOL_VERSION;

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServerContext>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/sessions", get(admin_sessions))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    protocol: u16,
    online: usize,
    uptime_secs: u64,
}

#[derive(Serialize)]
struct SessionEntry {
    user_id: i64,
    username: String,
}

#[derive(Serialize)]
struct AdminSessionsResponse {
    online: usize,
    sessions: Vec<SessionEntry>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.ctx.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        online: state.ctx.registry.count().await,
        uptime_secs: state.ctx.started_at.elapsed().as_secs(),
    })
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_sessions(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminSessionsResponse>, ServerError> {
    verify_admin_token(&headers, &state.ctx.config)?;

    let sessions: Vec<SessionEntry> = state
        .ctx
        .registry
        .online_users()
        .await
        .into_iter()
        .map(|identity| SessionEntry {
            user_id: identity.id.0,
            username: identity.username,
        })
        .collect();

    Ok(Json(AdminSessionsResponse {
        online: sessions.len(),
        sessions,
    }))
}

/// Serve the API until `shutdown` is cancelled.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_json(
        router: Router,
        path: &str,
        token: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().uri(path);
        if let Some(token) = token {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        let response = router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn app_with_token(token: Option<&str>) -> (Router, Harness) {
        let harness = Harness::with_config(ServerConfig {
            admin_token: token.map(str::to_string),
            instance_name: "test node".into(),
            ..ServerConfig::default()
        })
        .await;
        let router = build_router(AppState {
            ctx: harness.ctx.clone(),
        });
        (router, harness)
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _harness) = app_with_token(None).await;
        let (status, body) = get_json(router, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_info_reports_online_count() {
        let (router, harness) = app_with_token(None).await;
        let alice = harness.add_user("alice").await;
        let _rx = harness.attach(&alice).await;

        let (status, body) = get_json(router, "/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "test node");
        assert_eq!(body["online"], 1);
    }

    #[tokio::test]
    async fn test_admin_sessions_requires_token() {
        let (router, harness) = app_with_token(Some("s3cret")).await;
        let bob = harness.add_user("bob").await;
        let _rx = harness.attach(&bob).await;

        let (status, _) = get_json(router.clone(), "/admin/sessions", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = get_json(router.clone(), "/admin/sessions", Some("wrong!")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = get_json(router, "/admin/sessions", Some("s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["online"], 1);
        assert_eq!(body["sessions"][0]["username"], "bob");
    }

    #[tokio::test]
    async fn test_admin_disabled_without_token() {
        let (router, _harness) = app_with_token(None).await;
        let (status, body) = get_json(router, "/admin/sessions", Some("anything")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().contains("disabled"));
    }
}
