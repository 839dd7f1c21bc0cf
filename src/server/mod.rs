//! Loopback bridge: exposes the interceptor to any HTTP-speaking player.
//!
//! Rewritten playlists point at `/load?url=<intercepted URL>`; each such
//! request becomes one loading request, and disconnecting the client
//! cancels it.

pub mod handlers;
pub mod state;

use crate::config::Config;
use axum::{
    Router,
    http::{HeaderName, HeaderValue},
    middleware,
    response::Response,
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use state::AppState;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const VERSION_HEADER: HeaderName = HeaderName::from_static("x-hls-gate-version");

/// Build the router with a reqwest-backed interceptor
pub async fn build_router(config: Config) -> Result<Router, reqwest::Error> {
    let state = AppState::new(config)?;
    Ok(router(state))
}

/// Build the router over existing state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/play", get(handlers::load::play))
        .route("/load", get(handlers::load::load))
        .layer(middleware::map_response(add_version_header))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn add_version_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Start the Axum HTTP server
pub async fn start(
    config: Config,
    metrics: Option<PrometheusHandle>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);
    let base_url = config.base_url.clone();

    let mut state = AppState::new(config)?;
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }
    let interceptor = state.interceptor.clone();
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Bridge listening on http://{} (public base {})", addr, base_url);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    let cancelled = interceptor.cancel_all();
    info!("Server stopped, {} in-flight requests cancelled", cancelled);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
