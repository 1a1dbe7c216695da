//! GenAI audio relay server
//!
//! Serves the health check and the audio WebSocket endpoint, opening one
//! Gemini Live session per connected client.

#![forbid(unsafe_code)]

use genai_audio_relay::config::Config;
use genai_audio_relay::gemini_client::GeminiConnector;
use genai_audio_relay::server::{router, AppState, WS_PATH};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("Starting GenAI audio relay with model {}", config.session.model);

    let state = Arc::new(AppState {
        connector: Arc::new(GeminiConnector::new(config.gemini_api_key.clone())),
        session_config: config.session.clone(),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    info!(
        "GenAI Audio Streaming Backend listening on {} (WebSocket at {})",
        config.bind_address, WS_PATH
    );

    axum::serve(listener, app).await?;

    Ok(())
}
