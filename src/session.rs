//! Connection session controller
//!
//! Wires one client connection to one upstream Live session:
//! - a pump task applies upstream events to the generation state, forwards
//!   its notifications and hands each event to the turn queue
//! - a drain task assembles turns back to back, relaying audio
//! - the caller's loop base64-encodes inbound client frames and sends them up

use crate::events::SessionEvent;
use crate::gemini::{LiveSessionConfig, Result, AUDIO_MIME_TYPE};
use crate::gemini_client::{LiveConnector, LiveSession, SessionEvents};
use crate::tdbg;
use crate::turn_fsm::GenerationState;
use crate::turn_queue::{turn_queue, QueueHandle, TurnQueue};
use crate::ws_writer::{ClientSink, OutboundMessage};
use base64::engine::general_purpose;
use base64::Engine;
use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Run one client connection to completion.
///
/// `inbound` yields raw audio frames and ends when the client disconnects.
/// If the upstream session cannot be opened the client gets one `error`
/// message and `client` is closed.
pub async fn run_connection<C, S>(connector: &C, config: &LiveSessionConfig, inbound: S, client: ClientSink)
where
    C: LiveConnector + ?Sized,
    S: Stream<Item = Vec<u8>> + Unpin,
{
    let (live, events) = match connector.open(config).await {
        Ok(opened) => opened,
        Err(e) => {
            error!("Failed to open Gemini session: {}", e);
            client.send(OutboundMessage::error(e.to_string()));
            client.close();
            return;
        }
    };

    let mut session = ConnectionSession::start(live, events, client);
    session.relay_audio(inbound).await;
    session.shutdown().await;
}

/// State owned by one client connection.
pub struct ConnectionSession {
    live: Box<dyn LiveSession>,
    client: ClientSink,
    closed: bool,
    frames_sent: u64,
    pump: JoinHandle<()>,
    drain: JoinHandle<()>,
}

impl ConnectionSession {
    /// Take ownership of an open upstream session and start the pump and
    /// drain tasks.
    pub fn start(live: Box<dyn LiveSession>, events: SessionEvents, client: ClientSink) -> Self {
        let (queue_handle, queue) = turn_queue();
        let pump = tokio::spawn(pump_events(events, queue_handle, client.clone()));
        let drain = tokio::spawn(drain_turns(queue, client.clone()));

        Self {
            live,
            client,
            closed: false,
            frames_sent: 0,
            pump,
            drain,
        }
    }

    /// Encode one client frame and send it upstream. Empty frames are sent
    /// as an empty payload.
    pub async fn forward_audio(&mut self, frame: &[u8]) -> Result<()> {
        let data = general_purpose::STANDARD.encode(frame);
        tdbg!(
            "Received PCM buffer length: {}, base64 preview: {}",
            frame.len(),
            &data[..data.len().min(30)]
        );

        self.live.send_realtime_audio(data, AUDIO_MIME_TYPE).await?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Forward frames until the client stream ends. Send failures are
    /// reported to the client and do not end the connection.
    pub async fn relay_audio<S>(&mut self, mut inbound: S)
    where
        S: Stream<Item = Vec<u8>> + Unpin,
    {
        while let Some(frame) = inbound.next().await {
            if let Err(e) = self.forward_audio(&frame).await {
                warn!("Failed to relay audio upstream: {}", e);
                self.client.send(OutboundMessage::error(e.to_string()));
            }
        }
        debug!("Client audio stream ended after {} frame(s)", self.frames_sent);
    }

    /// Tear down: stop writing to the client, close the upstream session and
    /// stop the background tasks. Runs once.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.client.close();
        self.live.close().await;
        self.pump.abort();
        self.drain.abort();
        info!("Connection session closed ({} frame(s) relayed)", self.frames_sent);
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.pump.abort();
        self.drain.abort();
    }
}

/// Apply upstream events in delivery order: state machine first, then queue.
async fn pump_events(mut events: SessionEvents, queue: QueueHandle, client: ClientSink) {
    let mut state = GenerationState::new();

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Open => {
                client.send(OutboundMessage::status("Session opened"));
            }
            SessionEvent::Message(event) => {
                debug!("Received message from Gemini: {:?}", event);
                state.on_event(&event);
                for msg in state.drain_messages() {
                    client.send(msg);
                }
                if !queue.enqueue(event) {
                    debug!("Turn queue closed, stopping event pump");
                    break;
                }
            }
            SessionEvent::Error(message) => {
                error!("Gemini session error: {}", message);
                client.send(OutboundMessage::error(message));
            }
            SessionEvent::Closed(reason) => {
                info!("Gemini session closed: {:?}", reason);
                client.send(OutboundMessage::status(format!("Session closed: {reason}")));
            }
        }
    }
}

async fn drain_turns(mut queue: TurnQueue, client: ClientSink) {
    let mut completed = 0u64;
    while let Some(turn) = queue.drain_turn(&client).await {
        completed += 1;
        info!(
            "Turn {} complete: {} event(s), {} audio chunk(s){}",
            completed,
            turn.len(),
            turn.audio_chunks(),
            if turn.was_interrupted() { " (interrupted)" } else { "" }
        );
    }
    debug!("Drain loop finished after {} turn(s)", completed);
}
