//! Upstream session adapter for the Gemini Live API
//!
//! Opens one split-socket session per client connection. The reader half runs
//! in a background task and reports open/message/error/close as a single
//! ordered stream of [`SessionEvent`]s; the writer half is shared behind a
//! mutex for realtime audio sends.

use crate::events::SessionEvent;
use crate::gemini::{ClientMessage, GeminiError, LiveSessionConfig, RealtimeInput, Result, ServerMessage, LIVE_API_URL};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Ordered upstream events for one session.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Default time allowed between sending `setup` and receiving `setupComplete`.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens upstream sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a session and complete its setup handshake. The returned channel
    /// yields [`SessionEvent::Open`] first.
    async fn open(&self, config: &LiveSessionConfig) -> Result<(Box<dyn LiveSession>, SessionEvents)>;
}

/// Handle to one open upstream session.
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Forward one chunk of base64 audio. Fails with
    /// [`GeminiError::SessionClosed`] once the session is closed.
    async fn send_realtime_audio(&self, data: String, mime_type: &str) -> Result<()>;

    /// Release the session. Safe to call more than once.
    async fn close(&self);
}

/// Connects to the Live API over tokio-tungstenite.
#[derive(Clone)]
pub struct GeminiConnector {
    api_key: String,
    endpoint: String,
    setup_timeout: Duration,
}

impl GeminiConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: LIVE_API_URL.to_string(),
            setup_timeout: SETUP_TIMEOUT,
        }
    }

    /// Point the connector at a different WebSocket endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    /// Endpoint plus key. A bare `ws://host:port` gets a `/` path, which the
    /// handshake requires.
    fn url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('?');
        let has_path = endpoint
            .split_once("://")
            .map_or(true, |(_, rest)| rest.contains('/'));
        if has_path {
            format!("{}?key={}", endpoint, self.api_key)
        } else {
            format!("{}/?key={}", endpoint, self.api_key)
        }
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn open(&self, config: &LiveSessionConfig) -> Result<(Box<dyn LiveSession>, SessionEvents)> {
        info!("Connecting to Gemini Live API (model {})", config.model);

        let (ws_stream, resp) = connect_async(self.url())
            .await
            .map_err(|e| GeminiError::Connection(e.to_string()))?;
        debug!("WebSocket connection response: {:?}", resp.status());

        let (mut sink, mut stream) = ws_stream.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(config.to_setup()))?;
        sink.send(Message::text(setup))
            .await
            .map_err(|e| GeminiError::Connection(format!("failed to send setup: {e}")))?;
        debug!("Setup message sent, waiting for acknowledgment");

        tokio::time::timeout(self.setup_timeout, wait_for_setup_complete(&mut stream))
            .await
            .map_err(|_| {
                error!("Timeout waiting for setup complete message");
                GeminiError::Timeout
            })??;
        info!("Gemini session setup complete");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // receiver is held right here, so this cannot fail
        let _ = event_tx.send(SessionEvent::Open);
        let remote_closed = Arc::new(AtomicBool::new(false));
        let rx_task = tokio::spawn(read_loop(stream, event_tx, remote_closed.clone()));

        let session = GeminiSession {
            writer: Mutex::new(sink),
            closed: AtomicBool::new(false),
            remote_closed,
            rx_task,
        };
        Ok((Box::new(session), event_rx))
    }
}

/// An open Live API session.
pub struct GeminiSession {
    writer: Mutex<WsSink>,
    /// Set by `close`
    closed: AtomicBool,
    /// Set by the reader once the upstream closes or fails
    remote_closed: Arc<AtomicBool>,
    rx_task: JoinHandle<()>,
}

#[async_trait]
impl LiveSession for GeminiSession {
    async fn send_realtime_audio(&self, data: String, mime_type: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.remote_closed.load(Ordering::SeqCst) {
            return Err(GeminiError::SessionClosed);
        }

        let msg = ClientMessage::RealtimeInput(RealtimeInput::audio(data, mime_type));
        let json = serde_json::to_string(&msg)?;

        let mut writer = self.writer.lock().await;
        writer.send(Message::text(json)).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Closing Gemini session");
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            debug!("Close frame not delivered: {}", e);
        }
        if let Err(e) = writer.close().await {
            debug!("Sink close failed: {}", e);
        }
        self.rx_task.abort();
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        self.rx_task.abort();
    }
}

/// Text carried by a data frame. Binary frames are JSON too.
fn frame_text(msg: &Message) -> Option<Result<&str>> {
    match msg {
        Message::Text(text) => Some(Ok(text.as_str())),
        Message::Binary(bytes) => Some(
            std::str::from_utf8(&bytes[..])
                .map_err(|_| GeminiError::Protocol(format!("non-UTF-8 binary frame ({} bytes)", bytes.len()))),
        ),
        _ => None,
    }
}

/// Consume frames until `setupComplete`. Anything else ends the handshake.
async fn wait_for_setup_complete(stream: &mut WsStream) -> Result<()> {
    while let Some(next) = stream.next().await {
        let msg = next.map_err(|e| GeminiError::Connection(e.to_string()))?;

        if let Message::Close(frame) = &msg {
            let reason = frame.as_ref().map(|f| f.reason.as_str().to_owned()).unwrap_or_default();
            return Err(GeminiError::Connection(format!("closed during setup: {reason}")));
        }

        match frame_text(&msg) {
            Some(Ok(text)) => match ServerMessage::parse(text) {
                Ok(server_msg) if server_msg.is_setup_complete() => return Ok(()),
                Ok(_) => debug!("Ignoring message received before setup complete"),
                Err(e) => warn!("Ignoring malformed message during setup: {}", e),
            },
            Some(Err(e)) => warn!("Ignoring malformed message during setup: {}", e),
            None => {}
        }
    }

    Err(GeminiError::SetupNotComplete)
}

/// Forward upstream frames as session events until the socket closes.
async fn read_loop(
    mut stream: WsStream,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    remote_closed: Arc<AtomicBool>,
) {
    info!("Inbound message task started");

    while let Some(next) = stream.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                error!("Gemini WebSocket error: {:?}", e);
                remote_closed.store(true, Ordering::SeqCst);
                let _ = event_tx.send(SessionEvent::Error(e.to_string()));
                let _ = event_tx.send(SessionEvent::Closed(String::new()));
                return;
            }
        };

        if let Message::Close(frame) = &msg {
            let reason = frame.as_ref().map(|f| f.reason.as_str().to_owned()).unwrap_or_default();
            info!("Gemini WebSocket closed: {:?}", reason);
            remote_closed.store(true, Ordering::SeqCst);
            let _ = event_tx.send(SessionEvent::Closed(reason));
            return;
        }

        let event = match frame_text(&msg) {
            Some(Ok(text)) => ServerMessage::parse(text).and_then(ServerMessage::into_event),
            Some(Err(e)) => Err(e),
            // ping/pong
            None => continue,
        };

        match event {
            Ok(event) => {
                if event_tx.send(SessionEvent::Message(event)).is_err() {
                    debug!("Session event receiver dropped");
                    return;
                }
            }
            Err(e) => warn!("Dropping upstream message: {}", e),
        }
    }

    remote_closed.store(true, Ordering::SeqCst);
    let _ = event_tx.send(SessionEvent::Closed(String::new()));
    info!("Inbound message task terminated");
}
