//! Outbound client messages and the WebSocket writer task
//! This is the single point where messages bound for the browser are serialized to JSON

use crate::turn_fsm::TurnId;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

/// Message sent to the browser, one JSON object per frame, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Status {
        message: String,
    },
    /// Synthesized speech, base64 exactly as received upstream
    Audio {
        data: String,
    },
    /// Stop playback of the given turn (`null` when no turn was active)
    Interrupt {
        #[serde(rename = "turnId")]
        turn_id: Option<TurnId>,
        timestamp: u64,
    },
    GenerationStart {
        #[serde(rename = "turnId")]
        turn_id: TurnId,
    },
    Error {
        message: String,
    },
}

impl OutboundMessage {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status { message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

/// Producer side of the client socket.
///
/// Cloned into every task that talks to the browser. Once closed, sends are
/// refused so nothing is written after the socket goes away.
#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: UnboundedSender<OutboundMessage>,
    closed: Arc<AtomicBool>,
}

/// Create a sink and the receiver the writer task drains.
pub fn client_channel() -> (ClientSink, UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ClientSink {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
    };
    (sink, rx)
}

impl ClientSink {
    /// Queue a message for the client. Returns false if the socket is closed.
    pub fn send(&self, msg: OutboundMessage) -> bool {
        if self.is_closed() {
            debug!("Dropping {:?}: client socket closed", msg);
            return false;
        }
        self.tx.send(msg).is_ok()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

/// Run the websocket writer task until every [`ClientSink`] is dropped or
/// the socket rejects a write.
pub async fn run_writer<S>(mut outgoing_rx: UnboundedReceiver<OutboundMessage>, mut socket: S)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    info!("WebSocket writer task started");

    while let Some(msg) = outgoing_rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize outgoing message: {}", e);
                continue;
            }
        };

        if let Err(e) = socket.send(Message::Text(json.into())).await {
            // client already gone; normal on teardown
            debug!("Dropping outgoing message, websocket send failed: {}", e);
            break;
        }
    }

    if let Err(e) = socket.close().await {
        debug!("WebSocket close failed: {}", e);
    }
    info!("WebSocket writer task shutting down");
}
