//! Generation/interruption state machine
//!
//! Tracks whether the assistant is speaking and which turn is active, derived
//! from upstream events in arrival order. Client notifications produced by a
//! transition are buffered and drained after each event.

use crate::events::UpstreamEvent;
use crate::util::unix_millis;
use crate::ws_writer::OutboundMessage;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Identifier of one assistant turn, unique per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TurnId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observable phase of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase<'a> {
    Idle,
    Generating(&'a TurnId),
    /// `generationComplete` seen, `turnComplete` not yet: the generation flag
    /// is down but the turn id is still held.
    Finishing(&'a TurnId),
}

/// Per-connection generation state.
pub struct GenerationState {
    is_generating: bool,
    current_turn_id: Option<TurnId>,

    /// Last millisecond stamp handed out as a turn id
    last_stamp: u64,

    /// Outbound notifications (drained after each event)
    outbound: Vec<OutboundMessage>,
}

impl Default for GenerationState {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationState {
    pub fn new() -> Self {
        Self {
            is_generating: false,
            current_turn_id: None,
            last_stamp: 0,
            outbound: Vec::new(),
        }
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    pub fn current_turn_id(&self) -> Option<&TurnId> {
        self.current_turn_id.as_ref()
    }

    pub fn phase(&self) -> Phase<'_> {
        match (&self.current_turn_id, self.is_generating) {
            (Some(id), true) => Phase::Generating(id),
            (Some(id), false) => Phase::Finishing(id),
            (None, _) => Phase::Idle,
        }
    }

    /// Apply one upstream event.
    ///
    /// Checks run in a fixed order: interruption, model turn start,
    /// generation complete, turn complete. One event may trigger several.
    pub fn on_event(&mut self, event: &UpstreamEvent) {
        if event.interrupted {
            let turn_id = self.current_turn_id.take();
            info!("Interruption detected - stopping generation of turn {:?}", turn_id);
            self.is_generating = false;
            self.outbound.push(OutboundMessage::Interrupt {
                turn_id,
                timestamp: unix_millis(),
            });
        }

        if event.model_turn_started && !self.is_generating {
            let turn_id = self.next_turn_id();
            info!("Generation started for turn {}", turn_id);
            self.is_generating = true;
            self.current_turn_id = Some(turn_id.clone());
            self.outbound.push(OutboundMessage::GenerationStart { turn_id });
        }

        // Turn id is kept until turnComplete.
        if event.generation_complete {
            debug!("Generation complete for turn {:?}", self.current_turn_id);
            self.is_generating = false;
        }

        if event.turn_complete {
            debug!("Turn {:?} complete", self.current_turn_id);
            self.is_generating = false;
            self.current_turn_id = None;
        }
    }

    /// Drain all pending outbound messages
    pub fn drain_messages(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.outbound)
    }

    /// Wall-clock millisecond stamp, bumped past the previous one when two
    /// turns start within the same millisecond.
    fn next_turn_id(&mut self) -> TurnId {
        let stamp = unix_millis().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        TurnId(stamp.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_turn() -> UpstreamEvent {
        UpstreamEvent {
            model_turn_started: true,
            ..Default::default()
        }
    }

    fn interrupted() -> UpstreamEvent {
        UpstreamEvent {
            interrupted: true,
            ..Default::default()
        }
    }

    fn generation_complete() -> UpstreamEvent {
        UpstreamEvent {
            generation_complete: true,
            ..Default::default()
        }
    }

    fn turn_complete() -> UpstreamEvent {
        UpstreamEvent {
            turn_complete: true,
            ..Default::default()
        }
    }

    fn started_turn(msgs: &[OutboundMessage]) -> TurnId {
        match msgs {
            [OutboundMessage::GenerationStart { turn_id }] => turn_id.clone(),
            other => panic!("Expected a single generation_start, got {:?}", other),
        }
    }

    #[test]
    fn test_starts_idle() {
        let state = GenerationState::new();
        assert!(!state.is_generating());
        assert_eq!(state.current_turn_id(), None);
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn test_model_turn_starts_generation_once() {
        let mut state = GenerationState::new();

        state.on_event(&model_turn());
        let t1 = started_turn(&state.drain_messages());
        assert_eq!(state.phase(), Phase::Generating(&t1));

        // repeated model turns while generating are no-ops
        state.on_event(&model_turn());
        state.on_event(&model_turn());
        assert!(state.drain_messages().is_empty());
        assert_eq!(state.current_turn_id(), Some(&t1));
    }

    #[test]
    fn test_interruption_reports_active_turn() {
        let mut state = GenerationState::new();

        state.on_event(&model_turn());
        let t1 = started_turn(&state.drain_messages());

        state.on_event(&interrupted());
        match state.drain_messages().as_slice() {
            [OutboundMessage::Interrupt { turn_id, timestamp }] => {
                assert_eq!(turn_id.as_ref(), Some(&t1));
                assert!(*timestamp > 0);
            }
            other => panic!("Expected interrupt, got {:?}", other),
        }
        assert!(!state.is_generating());
        assert_eq!(state.current_turn_id(), None);
    }

    #[test]
    fn test_interruption_while_idle_has_no_turn() {
        let mut state = GenerationState::new();
        state.on_event(&interrupted());
        match state.drain_messages().as_slice() {
            [OutboundMessage::Interrupt { turn_id: None, .. }] => {}
            other => panic!("Expected interrupt without turn id, got {:?}", other),
        }
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn test_full_turn_returns_to_idle() {
        let mut state = GenerationState::new();

        let first = UpstreamEvent {
            audio: Some("X".to_string()),
            ..model_turn()
        };
        state.on_event(&first);
        let t1 = started_turn(&state.drain_messages());

        state.on_event(&generation_complete());
        assert!(!state.is_generating());
        assert_eq!(state.phase(), Phase::Finishing(&t1));

        state.on_event(&turn_complete());
        assert!(state.drain_messages().is_empty());
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.current_turn_id(), None);
    }

    #[test]
    fn test_model_turn_after_generation_complete_starts_new_turn() {
        let mut state = GenerationState::new();

        state.on_event(&model_turn());
        let t1 = started_turn(&state.drain_messages());
        state.on_event(&generation_complete());

        state.on_event(&model_turn());
        let t2 = started_turn(&state.drain_messages());
        assert_ne!(t1, t2);
        assert_eq!(state.phase(), Phase::Generating(&t2));
    }

    #[test]
    fn test_interruption_while_finishing_reports_held_turn() {
        let mut state = GenerationState::new();
        state.on_event(&model_turn());
        let t1 = started_turn(&state.drain_messages());
        state.on_event(&generation_complete());
        assert_eq!(state.phase(), Phase::Finishing(&t1));

        state.on_event(&interrupted());
        match state.drain_messages().as_slice() {
            [OutboundMessage::Interrupt { turn_id: Some(id), .. }] => assert_eq!(*id, t1),
            other => panic!("Expected interrupt for the held turn, got {:?}", other),
        }
        assert_eq!(state.phase(), Phase::Idle);
        assert!(!state.is_generating());
        assert_eq!(state.current_turn_id(), None);
    }

    #[test]
    fn test_interrupt_and_model_turn_in_one_event() {
        let mut state = GenerationState::new();
        state.on_event(&model_turn());
        let t1 = started_turn(&state.drain_messages());

        let event = UpstreamEvent {
            interrupted: true,
            model_turn_started: true,
            ..Default::default()
        };
        state.on_event(&event);
        let msgs = state.drain_messages();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(&msgs[0], OutboundMessage::Interrupt { turn_id: Some(id), .. } if *id == t1));
        let t2 = started_turn(&msgs[1..]);
        assert_ne!(t1, t2);
        assert!(state.is_generating());
    }

    #[test]
    fn test_turn_ids_are_unique_within_one_millisecond() {
        let mut state = GenerationState::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            state.on_event(&model_turn());
            seen.insert(started_turn(&state.drain_messages()));
            state.on_event(&turn_complete());
        }
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn test_turn_id_invariant_over_mixed_sequence() {
        let mut state = GenerationState::new();
        let events = [
            model_turn(),
            model_turn(),
            interrupted(),
            model_turn(),
            generation_complete(),
            turn_complete(),
            turn_complete(),
            generation_complete(),
            model_turn(),
            interrupted(),
            interrupted(),
            model_turn(),
            generation_complete(),
            model_turn(),
            generation_complete(),
            interrupted(),
            model_turn(),
            turn_complete(),
        ];

        let mut starts = 0;
        for event in &events {
            let was_generating = state.is_generating();
            state.on_event(event);
            let msgs = state.drain_messages();
            let new_starts = msgs
                .iter()
                .filter(|m| matches!(m, OutboundMessage::GenerationStart { .. }))
                .count();
            if was_generating && !event.interrupted {
                assert_eq!(new_starts, 0);
            }
            starts += new_starts;
            // the flag never outlives the turn id; outside the
            // generationComplete window the pair moves together
            match state.phase() {
                Phase::Idle => assert!(!state.is_generating()),
                Phase::Generating(_) => assert!(state.is_generating()),
                Phase::Finishing(_) => assert!(event.generation_complete && !event.turn_complete),
            }
            assert!(!state.is_generating() || state.current_turn_id().is_some());
        }
        assert_eq!(starts, 6);
        assert_eq!(state.phase(), Phase::Idle);
    }
}
