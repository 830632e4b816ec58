//! Turn controller.
//!
//! Turns the user's recording toggle into capture gating and, in manual turn
//! mode, into an explicit end of turn: when recording goes from on to off the
//! controller commits the remote input buffer and asks for a response. In
//! server-VAD mode the remote side decides turn boundaries and the toggle only
//! gates capture.

use tokio::sync::watch;

use super::channel::EventSender;
use super::{RealtimeResult, TurnMode};
use crate::core::audio::{RecordingState, RecordingSwitch, recording_channel};

/// Owner of the recording switch.
#[derive(Debug)]
pub struct TurnController {
    switch: RecordingSwitch,
    turn_mode: watch::Receiver<TurnMode>,
    sender: EventSender,
}

impl TurnController {
    /// Create a controller with recording off.
    ///
    /// Returns the capture-side view of the switch alongside it.
    pub fn new(turn_mode: watch::Receiver<TurnMode>, sender: EventSender) -> (Self, RecordingState) {
        let (switch, state) = recording_channel(false);
        (
            Self {
                switch,
                turn_mode,
                sender,
            },
            state,
        )
    }

    /// Whether recording is on.
    pub fn is_recording(&self) -> bool {
        self.switch.is_on()
    }

    /// Turn mode currently in effect.
    pub fn turn_mode(&self) -> TurnMode {
        *self.turn_mode.borrow()
    }

    /// Another capture-side view of the switch.
    pub fn recording_state(&self) -> RecordingState {
        self.switch.subscribe()
    }

    /// Set recording on or off.
    ///
    /// Setting the current value again does nothing. Returns whether the
    /// value changed.
    pub async fn set_recording(&self, on: bool) -> RealtimeResult<bool> {
        if !self.switch.set(on) {
            return Ok(false);
        }

        let mode = self.turn_mode();
        tracing::info!(
            "Recording {} ({} mode)",
            if on { "started" } else { "stopped" },
            mode
        );

        if !on && mode == TurnMode::Manual {
            self.sender.commit_audio().await?;
            self.sender.create_response().await?;
        }
        Ok(true)
    }

    /// Flip recording and return the new value.
    pub async fn toggle(&self) -> RealtimeResult<bool> {
        let on = !self.is_recording();
        self.set_recording(on).await?;
        Ok(on)
    }
}
