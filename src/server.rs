use crate::gemini::LiveSessionConfig;
use crate::gemini_client::LiveConnector;
use crate::session::run_connection;
use crate::ws_writer::{client_channel, run_writer};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::stream::SplitStream;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Path of the audio WebSocket endpoint.
pub const WS_PATH: &str = "/api/genai-audio";

pub const HEALTH_BODY: &str = "GenAI Audio Streaming Backend is running.";

/// Shared by every connection.
pub struct AppState {
    pub connector: Arc<dyn LiveConnector>,
    pub session_config: LiveSessionConfig,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    // Permissive CORS so a separately hosted frontend can connect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health))
        .route(WS_PATH, get(ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    HEALTH_BODY
}

/// Handles WebSocket upgrade requests.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manages an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket client connected");

    let (sender, receiver) = socket.split();
    let (client, outgoing_rx) = client_channel();
    let writer = tokio::spawn(run_writer(outgoing_rx, sender));

    run_connection(
        state.connector.as_ref(),
        &state.session_config,
        audio_frames(receiver),
        client,
    )
    .await;

    // the writer flushes what is queued, then closes the socket
    if let Err(e) = writer.await {
        error!("WebSocket writer task failed: {}", e);
    }
    info!("WebSocket client disconnected");
}

/// Raw audio bytes from the client. Binary and text frames both count;
/// the stream ends on close or socket error.
fn audio_frames(receiver: SplitStream<WebSocket>) -> impl Stream<Item = Vec<u8>> + Unpin {
    Box::pin(futures_util::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.next().await {
                Some(Ok(Message::Binary(bytes))) => return Some((bytes.to_vec(), receiver)),
                Some(Ok(Message::Text(text))) => return Some((text.as_str().as_bytes().to_vec(), receiver)),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    return None;
                }
            }
        }
    }))
}
