//! Turn queue and drain loop
//!
//! Upstream events are handed from the session pump to the drain loop over an
//! unbounded FIFO. The drain loop assembles them into turns, relaying
//! audio to the client as it goes.

use crate::events::UpstreamEvent;
use crate::ws_writer::{ClientSink, OutboundMessage};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// One conversational turn: every event up to and including `turnComplete`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Turn {
    pub events: Vec<UpstreamEvent>,
}

impl Turn {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events whose audio was relayed.
    pub fn audio_chunks(&self) -> usize {
        self.events.iter().filter(|e| e.relayable_audio().is_some()).count()
    }

    pub fn was_interrupted(&self) -> bool {
        self.events.iter().any(|e| e.interrupted)
    }
}

/// Producer half. Enqueueing never blocks.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: UnboundedSender<UpstreamEvent>,
}

impl QueueHandle {
    /// Append an event. Returns false once the drain side is gone.
    pub fn enqueue(&self, event: UpstreamEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Consumer half, owned by the drain loop.
#[derive(Debug)]
pub struct TurnQueue {
    rx: UnboundedReceiver<UpstreamEvent>,
}

pub fn turn_queue() -> (QueueHandle, TurnQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandle { tx }, TurnQueue { rx })
}

impl TurnQueue {
    /// Suspend until an event is available and return the oldest one.
    /// `None` once every [`QueueHandle`] is dropped and the queue is empty.
    pub async fn wait_next(&mut self) -> Option<UpstreamEvent> {
        self.rx.recv().await
    }

    /// Consume events up to and including the next `turnComplete`.
    ///
    /// Audio from non-interrupted events goes to `client` as each event is
    /// pulled, before the turn is returned. `None` means the queue closed
    /// before the turn finished.
    pub async fn drain_turn(&mut self, client: &ClientSink) -> Option<Turn> {
        let mut turn = Turn::default();

        while let Some(event) = self.wait_next().await {
            if let Some(data) = event.relayable_audio() {
                client.send(OutboundMessage::Audio { data: data.to_string() });
            }

            let done = event.turn_complete;
            turn.events.push(event);
            if done {
                return Some(turn);
            }
        }

        debug!("Turn queue closed with {} event(s) of an unfinished turn", turn.len());
        None
    }
}
