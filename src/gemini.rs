//! Gemini Live API wire types
//!
//! Setup and realtime-input messages sent upstream, the server messages read
//! back, and their projection onto [`UpstreamEvent`].

use crate::events::UpstreamEvent;
use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Error as WsError;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let config = LiveSessionConfig {
            model: "gemini-2.5-flash-preview-native-audio-dialog".to_string(),
            system_instruction: Some("You are Rev.".to_string()),
            ..Default::default()
        };

        let msg = ClientMessage::Setup(config.to_setup());
        let parsed = serde_json::to_value(&msg).unwrap();
        let setup = &parsed["setup"];

        assert_eq!(setup["model"], "models/gemini-2.5-flash-preview-native-audio-dialog");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "You are Rev.");

        let rt = &setup["realtimeInputConfig"];
        assert_eq!(rt["activityHandling"], "START_OF_ACTIVITY_INTERRUPTS");
        assert_eq!(rt["automaticActivityDetection"]["disabled"], false);
        assert_eq!(rt["automaticActivityDetection"]["prefixPaddingMs"], 20);
        assert_eq!(rt["automaticActivityDetection"]["silenceDurationMs"], 100);
        // default sensitivity leaves the choice to the server
        assert!(rt["automaticActivityDetection"].get("startOfSpeechSensitivity").is_none());
        assert!(rt["automaticActivityDetection"].get("endOfSpeechSensitivity").is_none());
    }

    #[test]
    fn test_explicit_sensitivity_and_prefixed_model() {
        let config = LiveSessionConfig {
            model: "models/custom".to_string(),
            activity_detection: ActivityDetection {
                start_sensitivity: Sensitivity::High,
                end_sensitivity: Sensitivity::Low,
                ..Default::default()
            },
            ..Default::default()
        };
        let parsed = serde_json::to_value(ClientMessage::Setup(config.to_setup())).unwrap();
        let aad = &parsed["setup"]["realtimeInputConfig"]["automaticActivityDetection"];

        assert_eq!(parsed["setup"]["model"], "models/custom");
        assert_eq!(aad["startOfSpeechSensitivity"], "START_SENSITIVITY_HIGH");
        assert_eq!(aad["endOfSpeechSensitivity"], "END_SENSITIVITY_LOW");
    }

    #[test]
    fn test_realtime_audio_serialization() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput::audio("QUJD", AUDIO_MIME_TYPE));
        let parsed = serde_json::to_value(&msg).unwrap();

        assert_eq!(parsed["realtimeInput"]["audio"]["data"], "QUJD");
        assert_eq!(parsed["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
    }

    #[test]
    fn test_setup_complete_detection() {
        let msg = ServerMessage::parse(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());

        let msg = ServerMessage::parse(r#"{"serverContent": {"turnComplete": true}}"#).unwrap();
        assert!(!msg.is_setup_complete());
    }

    #[test]
    fn test_server_content_projection() {
        let text = json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "QUJD"}}]},
                "generationComplete": true
            }
        })
        .to_string();

        let event = ServerMessage::parse(&text).unwrap().into_event().unwrap();
        assert_eq!(event.audio.as_deref(), Some("QUJD"));
        assert!(event.model_turn_started);
        assert!(event.generation_complete);
        assert!(!event.interrupted);
        assert!(!event.turn_complete);
    }

    #[test]
    fn test_flags_without_model_turn() {
        let event = ServerMessage::parse(r#"{"serverContent": {"interrupted": true}}"#)
            .unwrap()
            .into_event()
            .unwrap();
        assert!(event.interrupted);
        assert!(!event.model_turn_started);
        assert_eq!(event.audio, None);
    }

    #[test]
    fn test_multi_part_audio_is_concatenated() {
        let a = general_purpose::STANDARD.encode([1u8, 2]);
        let b = general_purpose::STANDARD.encode([3u8]);
        let text = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"data": a}},
                    {"text": "ignored"},
                    {"inlineData": {"data": b}}
                ]}
            }
        })
        .to_string();

        let event = ServerMessage::parse(&text).unwrap().into_event().unwrap();
        let joined = general_purpose::STANDARD.decode(event.audio.unwrap()).unwrap();
        assert_eq!(joined, vec![1, 2, 3]);
    }

    #[test]
    fn test_text_only_model_turn_has_no_audio() {
        let text = json!({"serverContent": {"modelTurn": {"parts": [{"text": "hi"}]}}}).to_string();
        let event = ServerMessage::parse(&text).unwrap().into_event().unwrap();
        assert!(event.model_turn_started);
        assert_eq!(event.audio, None);
    }

    #[test]
    fn test_other_messages_project_to_empty_event() {
        let event = ServerMessage::parse(r#"{"usageMetadata": {"totalTokenCount": 12}}"#)
            .unwrap()
            .into_event()
            .unwrap();
        assert_eq!(event, UpstreamEvent::default());
    }

    #[test]
    fn test_malformed_messages_are_protocol_errors() {
        assert!(matches!(ServerMessage::parse("not json"), Err(GeminiError::Protocol(_))));
        assert!(matches!(ServerMessage::parse("[1, 2]"), Err(GeminiError::Protocol(_))));
        assert!(matches!(
            ServerMessage::parse(r#"{"serverContent": {"turnComplete": "yes"}}"#),
            Err(GeminiError::Protocol(_))
        ));
    }

    #[test]
    fn test_bad_base64_in_multi_part_audio() {
        let text = json!({
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"data": "QUJD"}}, {"inlineData": {"data": "%%%"}}]}
            }
        })
        .to_string();
        let result = ServerMessage::parse(&text).unwrap().into_event();
        assert!(matches!(result, Err(GeminiError::Protocol(_))));
    }

    #[test]
    fn test_sensitivity_strings() {
        assert_eq!(Sensitivity::Default.start_of_speech(), None);
        assert_eq!(Sensitivity::Default.end_of_speech(), None);
        assert_eq!(Sensitivity::High.start_of_speech(), Some("START_SENSITIVITY_HIGH"));
        assert_eq!(Sensitivity::Low.end_of_speech(), Some("END_SENSITIVITY_LOW"));
    }

    #[test]
    fn test_go_away_is_ignored() {
        let msg = ServerMessage::parse(r#"{"goAway": {"timeLeft": "10s"}}"#).unwrap();
        assert!(!msg.is_setup_complete());
        assert_eq!(msg.into_event().unwrap(), UpstreamEvent::default());
    }
}

/// Live API WebSocket endpoint; the API key goes in the query string.
pub const LIVE_API_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Mime descriptor attached to every inbound audio chunk.
pub const AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-native-audio-dialog";

/// The relay only asks for spoken responses.
const RESPONSE_MODALITY: &str = "AUDIO";

/// New user speech cuts off an in-progress response.
const ACTIVITY_HANDLING: &str = "START_OF_ACTIVITY_INTERRUPTS";

/// Error type for Gemini API operations
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session could not be opened
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Send attempted on a session that is already closed
    #[error("Session closed")]
    SessionClosed,

    /// Upstream sent something that is not a Live API server message
    #[error("Unexpected upstream message: {0}")]
    Protocol(String),

    #[error("Timeout waiting for setup complete")]
    Timeout,

    #[error("Setup not complete")]
    SetupNotComplete,
}

pub type Result<T> = std::result::Result<T, GeminiError>;

/// Speech detection sensitivity. `Default` omits the field so the server
/// picks its own level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sensitivity {
    #[default]
    Default,
    High,
    Low,
}

impl Sensitivity {
    pub fn start_of_speech(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::High => Some("START_SENSITIVITY_HIGH"),
            Self::Low => Some("START_SENSITIVITY_LOW"),
        }
    }

    pub fn end_of_speech(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::High => Some("END_SENSITIVITY_HIGH"),
            Self::Low => Some("END_SENSITIVITY_LOW"),
        }
    }
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDetection {
    pub start_sensitivity: Sensitivity,
    pub end_sensitivity: Sensitivity,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for ActivityDetection {
    fn default() -> Self {
        Self {
            start_sensitivity: Sensitivity::Default,
            end_sensitivity: Sensitivity::Default,
            prefix_padding_ms: 20,
            silence_duration_ms: 100,
        }
    }
}

/// Everything the relay passes when opening a Live session.
#[derive(Debug, Clone)]
pub struct LiveSessionConfig {
    pub model: String,
    pub system_instruction: Option<String>,
    pub activity_detection: ActivityDetection,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: None,
            activity_detection: ActivityDetection::default(),
        }
    }
}

impl LiveSessionConfig {
    /// Build the setup payload sent as the first upstream message.
    pub fn to_setup(&self) -> BidiGenerateContentSetup {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        let vad = &self.activity_detection;
        BidiGenerateContentSetup {
            model,
            generation_config: Some(GenerationConfig {
                response_modalities: vec![RESPONSE_MODALITY.to_string()],
            }),
            system_instruction: self.system_instruction.as_ref().map(|instruction| Content {
                parts: vec![Part {
                    text: Some(instruction.clone()),
                    inline_data: None,
                }],
            }),
            realtime_input_config: Some(RealtimeInputConfig {
                automatic_activity_detection: Some(AutomaticActivityDetection {
                    disabled: false,
                    start_of_speech_sensitivity: vad.start_sensitivity.start_of_speech().map(str::to_string),
                    end_of_speech_sensitivity: vad.end_sensitivity.end_of_speech().map(str::to_string),
                    prefix_padding_ms: Some(vad.prefix_padding_ms),
                    silence_duration_ms: Some(vad.silence_duration_ms),
                }),
                activity_handling: Some(ACTIVITY_HANDLING.to_string()),
            }),
        }
    }
}

/// Generation configuration for setup.
#[derive(Debug, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
}

/// Used both for the system instruction and for model turns read back.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 payload with its mime descriptor.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_of_speech_sensitivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_speech_sensitivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_activity_detection: Option<AutomaticActivityDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_handling: Option<String>,
}

/// Session setup message.
#[derive(Debug, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
}

/// A chunk of realtime input
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub audio: Blob,
}

impl RealtimeInput {
    pub fn audio(data: impl Into<String>, mime_type: &str) -> Self {
        Self {
            audio: Blob {
                mime_type: mime_type.to_string(),
                data: data.into(),
            },
        }
    }
}

/// Message sent from the relay to the Live API.
///
/// Serializes externally tagged, e.g. `{"setup": {...}}`.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(RealtimeInput),
}

/// Server -> relay message. Only the fields the relay reads are typed;
/// everything else (tool calls, usage metadata, go-away) is accepted and
/// ignored.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub generation_complete: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

impl ServerContent {
    /// Base64 audio carried by the model turn.
    ///
    /// A single inline part passes through untouched; several are decoded,
    /// joined and re-encoded.
    fn audio_payload(&self) -> Result<Option<String>> {
        let Some(turn) = &self.model_turn else {
            return Ok(None);
        };

        let mut chunks: Vec<&str> = turn
            .parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
            .collect();

        match chunks.len() {
            0 => Ok(None),
            1 => Ok(chunks.pop().map(str::to_string)),
            _ => {
                let mut joined = Vec::new();
                for chunk in chunks {
                    let bytes = general_purpose::STANDARD
                        .decode(chunk)
                        .map_err(|e| GeminiError::Protocol(format!("invalid inline audio: {e}")))?;
                    joined.extend_from_slice(&bytes);
                }
                Ok(Some(general_purpose::STANDARD.encode(joined)))
            }
        }
    }
}

impl ServerMessage {
    /// Parse one upstream frame. Anything that is not a JSON object of the
    /// expected shape is a protocol error.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GeminiError::Protocol(e.to_string()))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Project onto the fields the turn machinery reacts to.
    pub fn into_event(self) -> Result<UpstreamEvent> {
        let Some(content) = self.server_content else {
            return Ok(UpstreamEvent::default());
        };

        Ok(UpstreamEvent {
            audio: content.audio_payload()?,
            interrupted: content.interrupted,
            model_turn_started: content.model_turn.is_some(),
            generation_complete: content.generation_complete,
            turn_complete: content.turn_complete,
        })
    }
}
