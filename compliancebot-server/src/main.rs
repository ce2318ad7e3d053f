use anyhow::Result;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use compliancebot_core::ComplianceConfig;
use compliancebot_server::config::Config;
use compliancebot_server::github::GitHubClient;
use compliancebot_server::webhook::webhook_router;
use compliancebot_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "aiwa-compliancebot"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting AiWA ComplianceBot");

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let github_client = GitHubClient::new(config.github_app_id, config.github_private_key);

    let app_state = Arc::new(AppState {
        github_client,
        webhook_secret: config.github_webhook_secret,
        default_config: ComplianceConfig::default(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
