//! Session protocol state machine.
//!
//! Consumes server events in receipt order and reacts to each one: audio
//! deltas feed the playback buffer, text deltas feed the transcript store,
//! speech onset cuts playback off, and completed responses trigger local tool
//! calls. Observers follow along through watch channels for the lifecycle
//! state and turn mode, and through a stream of [`SessionEvent`]s.
//!
//! ```text
//! Connecting ──session.created──> Established ──> Listening <──> Responding
//!                                                      │
//!                        cancel / fatal error ──> Closing ──> Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::channel::{EventSender, InboundEvents};
use super::openai::{ApiError, Response, ServerEvent, Session, decode_audio_delta};
use super::tools::{DEFAULT_TOOL_TIMEOUT, PendingToolCall, ToolRegistry};
use super::transcript::{RetentionPolicy, TranscriptStore};
use super::{
    NegotiatedSession, RealtimeError, RealtimeResult, SessionEvent, SessionState,
    TranscriptResult, TranscriptRole, TurnMode,
};
use crate::core::audio::PlaybackBuffer;

/// Default bound on device and transport teardown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for a [`SessionMachine`].
#[derive(Debug, Clone, Copy)]
pub struct MachineOptions {
    /// Turn mode assumed until the remote side reports one
    pub turn_mode: TurnMode,
    /// Bound on a single tool invocation
    pub tool_timeout: Duration,
    /// Bound on closing the playback device
    pub shutdown_timeout: Duration,
    /// What happens to finalized transcripts
    pub retention: RetentionPolicy,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            turn_mode: TurnMode::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Receiving side of a machine's observers.
#[derive(Debug)]
pub struct MachineObservers {
    pub state: watch::Receiver<SessionState>,
    pub turn_mode: watch::Receiver<TurnMode>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Reacts to server events for one session.
///
/// Without a playback buffer, audio deltas are decoded and discarded.
pub struct SessionMachine {
    options: MachineOptions,
    negotiated: Option<NegotiatedSession>,
    playback: Option<PlaybackBuffer>,
    tools: Arc<ToolRegistry>,
    transcripts: TranscriptStore,
    sender: EventSender,
    last_audio_item: Option<String>,
    state: watch::Sender<SessionState>,
    turn_mode: watch::Sender<TurnMode>,
    events: mpsc::UnboundedSender<SessionEvent>,
    faults_tx: mpsc::UnboundedSender<RealtimeError>,
    faults: mpsc::UnboundedReceiver<RealtimeError>,
    tool_rounds: JoinSet<()>,
}

impl SessionMachine {
    pub fn new(
        playback: Option<PlaybackBuffer>,
        tools: Arc<ToolRegistry>,
        sender: EventSender,
        options: MachineOptions,
    ) -> (Self, MachineObservers) {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (mode_tx, mode_rx) = watch::channel(options.turn_mode);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (faults_tx, faults) = mpsc::unbounded_channel();

        let machine = Self {
            options,
            negotiated: None,
            playback,
            tools,
            transcripts: TranscriptStore::new(options.retention),
            sender,
            last_audio_item: None,
            state: state_tx,
            turn_mode: mode_tx,
            events: events_tx,
            faults_tx,
            faults,
            tool_rounds: JoinSet::new(),
        };
        let observers = MachineObservers {
            state: state_rx,
            turn_mode: mode_rx,
            events: events_rx,
        };
        (machine, observers)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn turn_mode(&self) -> TurnMode {
        *self.turn_mode.borrow()
    }

    /// Configuration acknowledged by the remote side, once created.
    pub fn negotiated(&self) -> Option<&NegotiatedSession> {
        self.negotiated.as_ref()
    }

    pub fn playback(&self) -> Option<&PlaybackBuffer> {
        self.playback.as_ref()
    }

    /// Inlet for failures detected outside the event stream, such as a
    /// capture device error. Fatal faults end [`run`](Self::run).
    pub fn fault_sender(&self) -> mpsc::UnboundedSender<RealtimeError> {
        self.faults_tx.clone()
    }

    pub fn transcripts(&self) -> &TranscriptStore {
        &self.transcripts
    }

    /// Number of tool rounds still running.
    pub fn tool_rounds_in_flight(&self) -> usize {
        self.tool_rounds.len()
    }

    /// Wait until every tool round started so far has sent its results.
    pub async fn settle_tool_calls(&mut self) {
        while let Some(joined) = self.tool_rounds.join_next().await {
            log_round_exit(joined);
        }
    }

    // =========================================================================
    // Event Handling
    // =========================================================================

    /// Apply one server event.
    ///
    /// Only fatal errors are returned. Malformed payloads and provider errors
    /// are reported and swallowed. Function calls from `response.done` are
    /// answered in the background; failures there arrive on the fault inlet.
    pub async fn handle_event(&mut self, event: ServerEvent) -> RealtimeResult<()> {
        match event {
            ServerEvent::SessionCreated { session } => self.on_session_created(&session),
            ServerEvent::SessionUpdated { session } => self.on_session_updated(&session),

            ServerEvent::AudioDelta { item_id, delta, .. } => {
                self.on_audio_delta(&item_id, &delta)?;
            }
            ServerEvent::AudioDone { item_id } => {
                tracing::debug!("Audio for item {} complete", item_id);
            }

            ServerEvent::AudioTranscriptDelta { item_id, delta }
            | ServerEvent::TextDelta { item_id, delta } => {
                self.on_transcript_delta(&item_id, &delta);
            }
            ServerEvent::AudioTranscriptDone {
                item_id,
                transcript: text,
            }
            | ServerEvent::TextDone { item_id, text } => {
                self.on_transcript_done(&item_id, &text);
            }
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                self.transcripts
                    .record(&item_id, TranscriptRole::User, &transcript);
                self.emit(SessionEvent::Transcript(TranscriptResult {
                    text: transcript,
                    role: TranscriptRole::User,
                    is_final: true,
                    item_id,
                }));
            }

            ServerEvent::SpeechStarted { item_id, .. } => {
                self.on_speech_started(item_id)?;
            }
            ServerEvent::SpeechStopped { item_id, .. } => {
                tracing::debug!("Speech stopped ({})", item_id);
                self.emit(SessionEvent::SpeechStopped { item_id });
            }
            ServerEvent::InputAudioBufferCommitted { item_id } => {
                tracing::debug!("Input audio committed as {}", item_id);
            }

            ServerEvent::ResponseCreated { response } => {
                tracing::debug!("Response {} created", response.id);
            }
            ServerEvent::ResponseDone { response } => self.on_response_done(response),

            ServerEvent::Error { error } => self.on_provider_error(error),

            ServerEvent::Unknown => {
                tracing::trace!("Ignoring unhandled server event");
            }
        }
        Ok(())
    }

    fn on_session_created(&mut self, session: &Session) {
        let negotiated = NegotiatedSession::from_session(session, self.options.turn_mode);
        tracing::info!(
            "Session {} created (model: {}, turn mode: {})",
            negotiated.id,
            negotiated.model,
            negotiated.turn_mode
        );

        self.turn_mode.send_replace(negotiated.turn_mode);
        let session_id = negotiated.id.clone();
        self.negotiated = Some(negotiated);
        self.set_state(SessionState::Established);
        self.emit(SessionEvent::Ready { session_id });
        self.set_state(SessionState::Listening);
    }

    fn on_session_updated(&mut self, session: &Session) {
        let fallback = self.options.turn_mode;
        let negotiated = self
            .negotiated
            .get_or_insert_with(|| NegotiatedSession::from_session(session, fallback));
        negotiated.amend(session);
        let turn_mode = negotiated.turn_mode;

        tracing::info!("Session updated (turn mode: {})", turn_mode);
        self.turn_mode.send_replace(turn_mode);
        self.emit(SessionEvent::ConfigUpdated { turn_mode });
    }

    fn on_audio_delta(&mut self, item_id: &str, delta: &str) -> RealtimeResult<()> {
        let chunk = match decode_audio_delta(delta) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Dropping audio delta for {}: {}", item_id, e);
                return Ok(());
            }
        };

        self.set_state(SessionState::Responding);
        let Some(playback) = self.playback.as_mut() else {
            tracing::trace!("No output device; discarding {} samples", chunk.len());
            return Ok(());
        };

        if self.last_audio_item.as_deref() != Some(item_id) {
            playback.reset_frame_counter();
            self.last_audio_item = Some(item_id.to_string());
        }
        playback.enqueue(chunk)?;
        Ok(())
    }

    fn on_transcript_delta(&mut self, item_id: &str, delta: &str) {
        let text = self
            .transcripts
            .append(item_id, TranscriptRole::Assistant, delta)
            .to_string();
        self.set_state(SessionState::Responding);
        self.emit(SessionEvent::Transcript(TranscriptResult {
            text,
            role: TranscriptRole::Assistant,
            is_final: false,
            item_id: item_id.to_string(),
        }));
    }

    fn on_transcript_done(&mut self, item_id: &str, full_text: &str) {
        let text = self
            .transcripts
            .finalize(item_id, TranscriptRole::Assistant, full_text);
        self.emit(SessionEvent::Transcript(TranscriptResult {
            text,
            role: TranscriptRole::Assistant,
            is_final: true,
            item_id: item_id.to_string(),
        }));
    }

    fn on_speech_started(&mut self, item_id: String) -> RealtimeResult<()> {
        if let Some(playback) = self.playback.as_mut() {
            let dropped = playback.queued_samples();
            playback.stop()?;
            tracing::debug!(
                "Speech started ({}), dropped {} queued samples",
                item_id,
                dropped
            );
        }
        self.set_state(SessionState::Listening);
        self.emit(SessionEvent::SpeechStarted { item_id });
        Ok(())
    }

    /// Function calls run as a background round so that speech onset and
    /// cancellation are served while a tool is busy.
    fn on_response_done(&mut self, response: Response) {
        let calls: Vec<PendingToolCall> = response
            .function_calls()
            .filter_map(|item| {
                let call = PendingToolCall::from_item(item);
                if call.is_none() {
                    tracing::warn!("Ignoring function call without call ID or name");
                }
                call
            })
            .collect();

        tracing::debug!(
            "Response {} done ({}, {} tool calls)",
            response.id,
            response.status,
            calls.len()
        );
        self.set_state(SessionState::Listening);

        if calls.is_empty() {
            self.emit(SessionEvent::ResponseDone {
                response_id: response.id,
                tool_calls: 0,
            });
            return;
        }

        let round = ToolRound {
            response_id: response.id,
            calls,
            tools: Arc::clone(&self.tools),
            sender: self.sender.clone(),
            events: self.events.clone(),
            timeout: self.options.tool_timeout,
        };
        let faults = self.faults_tx.clone();
        self.tool_rounds.spawn(async move {
            if let Err(e) = round.run().await {
                let _ = faults.send(e);
            }
        });
    }

    fn on_provider_error(&mut self, error: ApiError) {
        tracing::error!(
            "Provider error: {} (type: {}, code: {:?})",
            error.message,
            error.error_type,
            error.code
        );
        self.emit(SessionEvent::ProviderError {
            message: error.message,
            code: error.code,
        });
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    /// Process inbound events until cancellation, channel closure or a fatal
    /// error, then tear down.
    ///
    /// A fatal exit cancels `cancel` so sibling tasks stop too.
    pub async fn run(
        mut self,
        mut inbound: InboundEvents,
        cancel: CancellationToken,
    ) -> RealtimeResult<()> {
        let result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Ok(()),

                Some(fault) = self.faults.recv() => {
                    if fault.is_fatal() {
                        break Err(fault);
                    }
                    tracing::warn!("Session fault: {}", fault);
                }

                Some(joined) = self.tool_rounds.join_next(), if !self.tool_rounds.is_empty() => {
                    log_round_exit(joined);
                }

                next = inbound.recv() => match next {
                    Some(Ok(event)) => {
                        if let Err(e) = self.handle_event(event).await {
                            if e.is_fatal() {
                                break Err(e);
                            }
                            tracing::warn!("Event handling failed: {}", e);
                        }
                    }
                    Some(Err(e)) if e.is_fatal() => break Err(e),
                    Some(Err(e)) => tracing::warn!("Transport reported: {}", e),
                    None => {
                        break Err(RealtimeError::ConnectionClosed(
                            "inbound channel closed".to_string(),
                        ));
                    }
                },
            }
        };

        self.teardown(result, &cancel).await
    }

    async fn teardown(
        &mut self,
        result: RealtimeResult<()>,
        cancel: &CancellationToken,
    ) -> RealtimeResult<()> {
        self.set_state(SessionState::Closing);

        let reason = match &result {
            Ok(()) => None,
            Err(e) => {
                tracing::error!("Session ending: {}", e);
                cancel.cancel();
                Some(e.to_string())
            }
        };

        if !self.tool_rounds.is_empty() {
            tracing::debug!("Abandoning {} tool rounds", self.tool_rounds.len());
            self.tool_rounds.shutdown().await;
        }

        let closed = match self.playback.as_mut() {
            Some(playback) => playback.shutdown(self.options.shutdown_timeout).await,
            None => Ok(()),
        };
        if let Err(e) = &closed {
            tracing::warn!("Playback device did not close cleanly: {}", e);
        }

        self.set_state(SessionState::Closed);
        self.emit(SessionEvent::Closed { reason });
        tracing::info!("Session closed");

        result?;
        closed.map_err(RealtimeError::from)
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Session state: {} -> {}", previous, state);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Session event dropped; no observer");
        }
    }
}

/// Function calls of one response, answered in output order and followed by a
/// single `response.create`.
struct ToolRound {
    response_id: String,
    calls: Vec<PendingToolCall>,
    tools: Arc<ToolRegistry>,
    sender: EventSender,
    events: mpsc::UnboundedSender<SessionEvent>,
    timeout: Duration,
}

impl ToolRound {
    async fn run(self) -> RealtimeResult<()> {
        for call in &self.calls {
            let outcome = self.tools.dispatch(call, self.timeout).await;
            self.sender
                .submit_tool_result(&outcome.call_id, &outcome.output)
                .await?;
            let _ = self.events.send(SessionEvent::ToolInvoked {
                call_id: outcome.call_id,
                name: outcome.name,
                output: outcome.output,
                is_error: outcome.is_error,
            });
        }

        self.sender.create_response().await?;
        let _ = self.events.send(SessionEvent::ResponseDone {
            response_id: self.response_id,
            tool_calls: self.calls.len(),
        });
        Ok(())
    }
}

fn log_round_exit(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        tracing::error!("Tool round panicked: {}", e);
    }
}

impl std::fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMachine")
            .field("state", &self.state())
            .field("turn_mode", &self.turn_mode())
            .field("negotiated", &self.negotiated)
            .field("playback", &self.playback)
            .field("tools", &self.tools)
            .field("tool_rounds", &self.tool_rounds.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
