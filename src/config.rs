use crate::gemini::{ActivityDetection, LiveSessionConfig, DEFAULT_MODEL};
use std::net::{IpAddr, SocketAddr};

/// Prompt used when `SYSTEM_INSTRUCTION` is not set.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Rev, the helpful voice assistant for Revolt Motors. \
Only talk about Revolt Motors: its electric motorcycles, features, pricing, booking, test rides and service. \
Politely steer any other topic back to Revolt Motors. Keep answers short and conversational.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub session: LiveSessionConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("gemini_api_key", &"<redacted>")
            .field("session", &self.session)
            .finish()
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `GEMINI_API_KEY`: Secret key for the Gemini Live API. Required.
    /// *   `HOST`: (Optional) IPv4 or IPv6 address to bind. Defaults to "0.0.0.0".
    /// *   `PORT`: (Optional) Port to listen on. Defaults to 5050.
    /// *   `GEMINI_MODEL`: (Optional) Live model. Defaults to the native-audio dialog model.
    /// *   `SYSTEM_INSTRUCTION`: (Optional) System prompt for the assistant.
    /// *   `VAD_PREFIX_PADDING_MS`: (Optional) Speech prefix padding. Defaults to 20.
    /// *   `VAD_SILENCE_DURATION_MS`: (Optional) Silence before end of speech. Defaults to 100.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let host = match lookup("HOST") {
            Some(raw) => raw
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .map_err(|e| ConfigError::InvalidValue("HOST".to_string(), format!("'{raw}': {e}")))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("'{raw}': {e}")))?,
            None => 5050,
        };
        let bind_address = SocketAddr::new(host, port);

        let defaults = ActivityDetection::default();
        let activity_detection = ActivityDetection {
            prefix_padding_ms: parse_or(&lookup, "VAD_PREFIX_PADDING_MS", defaults.prefix_padding_ms)?,
            silence_duration_ms: parse_or(&lookup, "VAD_SILENCE_DURATION_MS", defaults.silence_duration_ms)?,
            ..defaults
        };

        let session = LiveSessionConfig {
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_instruction: Some(
                lookup("SYSTEM_INSTRUCTION").unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            ),
            activity_detection,
            ..Default::default()
        };

        Ok(Self {
            bind_address,
            gemini_api_key,
            session,
        })
    }
}

fn parse_or<F>(lookup: &F, name: &str, default: u32) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), format!("'{raw}' is not a number of milliseconds"))),
        None => Ok(default),
    }
}
