//! Event types flowing from the upstream Live session into a connection.

/// One message from the upstream session, projected onto the fields the
/// relay acts on.
///
/// Events are immutable once received. Ownership moves into the turn queue
/// and each one is consumed exactly once by the drain loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamEvent {
    /// Base64 audio carried by the model turn, relayed to the client as-is
    pub audio: Option<String>,
    /// User speech cut the current generation short
    pub interrupted: bool,
    /// The message carried a `modelTurn`
    pub model_turn_started: bool,
    pub generation_complete: bool,
    /// Authoritative end of a conversational turn
    pub turn_complete: bool,
}

impl UpstreamEvent {
    /// Audio that should reach the client: present and not interrupted.
    pub fn relayable_audio(&self) -> Option<&str> {
        if self.interrupted {
            return None;
        }
        self.audio.as_deref()
    }
}

/// The four adapter callbacks (open/message/error/close), delivered in order
/// over a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The upstream session finished its setup handshake
    Open,
    /// A server message, already projected
    Message(UpstreamEvent),
    /// Transport-level failure reported by the upstream connection
    Error(String),
    /// The upstream connection closed, with the close-frame reason if any
    Closed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relayable_audio() {
        let event = UpstreamEvent {
            audio: Some("QUJD".to_string()),
            ..Default::default()
        };
        assert_eq!(event.relayable_audio(), Some("QUJD"));

        let interrupted = UpstreamEvent {
            audio: Some("QUJD".to_string()),
            interrupted: true,
            ..Default::default()
        };
        assert_eq!(interrupted.relayable_audio(), None);

        assert_eq!(UpstreamEvent::default().relayable_audio(), None);
    }
}
