//! Portico gateway edge
//!
//! Exposes interactive coding-assistant sessions over HTTP, Server-Sent
//! Events and WebSockets: the session directory and message endpoints, the
//! journal-backed chat stream, and PTY terminal sockets.

pub mod routes;
pub mod sse;
pub mod tailer;
pub mod websocket;

use axum::{Router, routing::get};
use portico_adapters::{ExecEngine, PtyRegistry};
use portico_core::{GatewayConfig, GatewayPaths};
use std::net::SocketAddr;
use std::sync::Arc;
use tailer::TailerManager;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub paths: GatewayPaths,
    /// Exec-provider turn engine
    pub engine: ExecEngine,
    /// PTY session registry
    pub registry: PtyRegistry,
    /// Journal tailers / SSE fan-out
    pub tailers: TailerManager,
}

/// Wire the process-wide singletons together.
pub fn build_state(config: GatewayConfig) -> AppState {
    let heartbeat = config.heartbeat_interval;
    let config = Arc::new(config);
    let paths = config.paths();
    let engine = ExecEngine::new(config.clone());
    let registry = PtyRegistry::new(config.clone());
    let tailers = TailerManager::new(paths.clone(), engine.clone(), heartbeat);

    AppState {
        config,
        paths,
        engine,
        registry,
        tailers,
    }
}

/// Create the application router for the given state.
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::api_routes(state.clone()))
        .route(
            "/ws/terminal",
            get(websocket::terminal_ws_handler).with_state(state),
        )
        .layer(cors)
}

/// Start the server; returns after graceful teardown on SIGINT/SIGTERM.
pub async fn serve(config: GatewayConfig) -> std::io::Result<()> {
    let paths = config.paths();
    paths.ensure()?;

    let port = config.port;
    let state = build_state(config);
    let reaper = state.registry.spawn_reaper();
    let app = create_app(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Starting portico gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown: stop the reaper, close file watchers, terminate PTYs.
    reaper.abort();
    state.tailers.shutdown().await;
    state.registry.shutdown().await;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_app(temp: &TempDir) -> Router {
        let config = GatewayConfig {
            root: temp.path().join("gw"),
            workdir: temp.path().to_path_buf(),
            ..Default::default()
        };
        config.paths().ensure().unwrap();
        create_app(build_state(config))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let temp = TempDir::new().unwrap();
        let app = test_app(&temp);

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/health")
                    .header("Origin", "http://localhost:5173")
                    .header("Access-Control-Request-Method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .contains_key("access-control-allow-origin")
        );
    }
}
