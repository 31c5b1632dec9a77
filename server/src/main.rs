mod client_config_api;
mod client_errors_api;
mod config;
mod embedded;
mod state;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(embedded::serve_index))
        .route("/health", get(health_check))
        .route("/api/client-config", get(client_config_api::get_client_config))
        .route("/api/client-errors", post(client_errors_api::post_client_error))
        .route("/public/{*path}", get(embedded::serve_public))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

async fn http_server(config: config::ServerConfig, app_state: AppState) {
    let srv = build_router(app_state).into_make_service();

    let ip_addr = config.host.parse::<std::net::IpAddr>().unwrap_or_else(|e| {
        tracing::warn!("Failed to parse host '{}': {}. Using 0.0.0.0", config.host, e);
        [0, 0, 0, 0].into()
    });
    let addr = SocketAddr::from((ip_addr, config.http_port));

    tracing::info!("HTTP server listening on {}", addr);
    if let Err(e) = axum_server::bind(addr).serve(srv).await {
        tracing::error!("HTTP server on {} stopped: {}", addr, e);
    }
}

#[tokio::main]
async fn main() {
    let config = config::Config::load_or_default();

    tracing_subscriber::fmt()
        .with_max_level(config.logging.tracing_level())
        .init();

    tracing::info!("Starting order form server");
    let missing = config.missing_client_settings();
    if !missing.is_empty() {
        tracing::warn!(
            "Client settings not configured, uploads or delivery will fail: {}",
            missing.join(", ")
        );
    }

    let app_state = AppState::new(config.client.clone());
    http_server(config.server, app_state).await;
}

async fn health_check() -> &'static str {
    "OK"
}
