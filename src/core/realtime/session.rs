//! Voice session orchestration.
//!
//! [`VoiceSession`] ties the pieces of a live conversation together over one
//! [`DuplexChannel`]: it sends the session configuration, runs the state
//! machine and the capture loop as tasks, and exposes the turn controller and
//! the event stream to its owner.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtvoice::core::realtime::{SessionSettings, VoiceSession, openai};
//!
//! let channel = openai::connect(&options).await?;
//! let mut session = VoiceSession::builder(SessionSettings::default())
//!     .tools(registry)
//!     .start(channel)
//!     .await?;
//!
//! session.wait_ready(Duration::from_secs(10)).await?;
//! session.toggle_recording().await?;
//! while let Some(event) = session.next_event().await {
//!     // ...
//! }
//! session.shutdown().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channel::{DuplexChannel, EventSender};
use super::machine::{DEFAULT_SHUTDOWN_TIMEOUT, MachineOptions, SessionMachine};
use super::tools::{DEFAULT_TOOL_TIMEOUT, ToolRegistry};
use super::transcript::RetentionPolicy;
use super::turn::TurnController;
use super::{
    RealtimeError, RealtimeResult, SessionEvent, SessionSettings, SessionState, TurnMode,
};
use crate::core::audio::{
    AudioResult, CaptureConfig, CaptureLoop, CaptureStats, InputDevice, OutputDevice,
    PlaybackBuffer, PlaybackConfig, PlaybackSource,
};

/// Opens an output device on the playback queue.
pub type OutputOpener =
    Box<dyn FnOnce(PlaybackSource) -> AudioResult<Box<dyn OutputDevice>> + Send>;

// =============================================================================
// Builder
// =============================================================================

/// Configures and starts a [`VoiceSession`].
pub struct VoiceSessionBuilder {
    settings: SessionSettings,
    tools: ToolRegistry,
    output: Option<OutputOpener>,
    playback: PlaybackConfig,
    input: Option<Box<dyn InputDevice>>,
    capture: CaptureConfig,
    tool_timeout: Duration,
    retention: RetentionPolicy,
    shutdown_timeout: Duration,
}

impl VoiceSessionBuilder {
    /// Local tools offered to the remote side.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Output device. Without one, response audio is discarded.
    pub fn output<F>(mut self, open: F) -> Self
    where
        F: FnOnce(PlaybackSource) -> AudioResult<Box<dyn OutputDevice>> + Send + 'static,
    {
        self.output = Some(Box::new(open));
        self
    }

    pub fn playback(mut self, config: PlaybackConfig) -> Self {
        self.playback = config;
        self
    }

    /// Input device. Without one, no capture loop runs.
    pub fn input(mut self, device: Box<dyn InputDevice>) -> Self {
        self.input = Some(device);
        self
    }

    pub fn capture(mut self, config: CaptureConfig) -> Self {
        self.capture = config;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    /// Bound on each teardown step.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Configure the remote session and start the session tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(self, mut channel: DuplexChannel) -> RealtimeResult<VoiceSession> {
        let inbound = channel.take_inbound().ok_or_else(|| {
            RealtimeError::InvalidConfiguration("channel inbound already taken".to_string())
        })?;
        let sender = channel.sender();

        let config = self.settings.session_config(self.tools.definitions());
        sender.configure_session(config).await?;
        tracing::info!(
            "Session configuration sent ({} mode, {} tools)",
            self.settings.turn_mode,
            self.tools.len()
        );

        let playback = match self.output {
            Some(open) => Some(PlaybackBuffer::open(self.playback, open)?),
            None => None,
        };

        let (machine, observers) = SessionMachine::new(
            playback,
            Arc::new(self.tools),
            sender.clone(),
            MachineOptions {
                turn_mode: self.settings.turn_mode,
                tool_timeout: self.tool_timeout,
                shutdown_timeout: self.shutdown_timeout,
                retention: self.retention,
            },
        );
        let faults = machine.fault_sender();

        let cancel = CancellationToken::new();
        let (controller, recording) =
            TurnController::new(observers.turn_mode.clone(), sender.clone());

        let capture_task = self.input.map(|device| {
            let capture = CaptureLoop::new(device, self.capture, recording, sender.raw());
            let token = cancel.clone();
            tokio::spawn(async move {
                match capture.run(token).await {
                    Ok(stats) => Some(stats),
                    Err(e) => {
                        tracing::error!("Capture loop failed: {}", e);
                        let _ = faults.send(e);
                        None
                    }
                }
            })
        });

        let machine_task = tokio::spawn(machine.run(inbound, cancel.clone()));

        Ok(VoiceSession {
            channel,
            sender,
            controller,
            state: observers.state,
            turn_mode: observers.turn_mode,
            events: observers.events,
            cancel,
            machine_task: Some(machine_task),
            capture_task,
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}

// =============================================================================
// Voice Session
// =============================================================================

/// A running conversation.
pub struct VoiceSession {
    channel: DuplexChannel,
    sender: EventSender,
    controller: TurnController,
    state: watch::Receiver<SessionState>,
    turn_mode: watch::Receiver<TurnMode>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    machine_task: Option<JoinHandle<RealtimeResult<()>>>,
    capture_task: Option<JoinHandle<Option<CaptureStats>>>,
    shutdown_timeout: Duration,
}

impl VoiceSession {
    pub fn builder(settings: SessionSettings) -> VoiceSessionBuilder {
        VoiceSessionBuilder {
            settings,
            tools: ToolRegistry::new(),
            output: None,
            playback: PlaybackConfig::default(),
            input: None,
            capture: CaptureConfig::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            retention: RetentionPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Wait until the remote side has created the session.
    pub async fn wait_ready(&self, timeout: Duration) -> RealtimeResult<()> {
        let mut state = self.state.clone();
        let waited = tokio::time::timeout(
            timeout,
            state.wait_for(|s| s.is_active() || *s == SessionState::Closed),
        )
        .await
        .map_err(|_| {
            RealtimeError::Timeout(format!(
                "session not ready within {}ms",
                timeout.as_millis()
            ))
        })?;

        match waited {
            Ok(s) if s.is_active() => Ok(()),
            _ => Err(RealtimeError::ConnectionClosed(
                "session closed before it was ready".to_string(),
            )),
        }
    }

    /// Flip recording and return the new value.
    pub async fn toggle_recording(&self) -> RealtimeResult<bool> {
        self.controller.toggle().await
    }

    /// Set recording on or off. Returns whether the value changed.
    pub async fn set_recording(&self, on: bool) -> RealtimeResult<bool> {
        self.controller.set_recording(on).await
    }

    pub fn is_recording(&self) -> bool {
        self.controller.is_recording()
    }

    /// Handle for injecting text, audio and response requests.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Next session event. Returns `None` once the session has closed and all
    /// events were consumed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Turn mode currently in effect.
    pub fn turn_mode(&self) -> TurnMode {
        *self.turn_mode.borrow()
    }

    /// Token cancelled when the session is torn down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tear the session down.
    ///
    /// Stops the capture loop and the state machine, then closes the channel.
    /// Each step is bounded by the shutdown timeout and every step runs even
    /// when an earlier one fails; the first error is returned.
    pub async fn shutdown(&mut self) -> RealtimeResult<()> {
        tracing::info!("Shutting down voice session");
        self.cancel.cancel();

        let mut first_error = None;

        if let Some(task) = self.capture_task.take() {
            match join_bounded(task, self.shutdown_timeout, "capture loop").await {
                Ok(Some(stats)) => tracing::debug!(
                    "Capture loop stopped ({} blocks sent, {} discarded)",
                    stats.blocks_sent,
                    stats.blocks_discarded
                ),
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        // The machine's own teardown spends up to one bound closing the
        // output device.
        if let Some(task) = self.machine_task.take()
            && let Err(e) = join_bounded(task, self.shutdown_timeout * 2, "state machine")
                .await
                .and_then(|result| result)
        {
            first_error.get_or_insert(e);
        }

        if let Err(e) = self.channel.close(self.shutdown_timeout).await {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("state", &self.state())
            .field("turn_mode", &self.turn_mode())
            .field("recording", &self.is_recording())
            .finish()
    }
}

async fn join_bounded<T>(
    mut task: JoinHandle<T>,
    timeout: Duration,
    what: &str,
) -> RealtimeResult<T> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(RealtimeError::ConnectionClosed(format!("{what} task failed: {e}"))),
        Err(_) => {
            task.abort();
            Err(RealtimeError::Timeout(format!(
                "{what} did not stop within {}ms",
                timeout.as_millis()
            )))
        }
    }
}
