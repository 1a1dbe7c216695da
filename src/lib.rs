//! GenAI audio relay
//!
//! Bridges a browser audio WebSocket to a Gemini Live session: microphone
//! audio goes up, synthesized speech and turn lifecycle events come back.

#![forbid(unsafe_code)]

/// Environment configuration
pub mod config;
/// Upstream event types
pub mod events;
/// Gemini Live API wire types
pub mod gemini;
/// Upstream session adapter
pub mod gemini_client;
/// HTTP and WebSocket routes
pub mod server;
/// Per-connection controller
pub mod session;
/// Generation/interruption state machine
pub mod turn_fsm;
/// Turn queue and drain loop
pub mod turn_queue;
pub mod util;
/// Outbound client messages
pub mod ws_writer;
