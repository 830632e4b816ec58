//! Duplex event channel between a session and the remote service.
//!
//! The engine never touches the transport directly. It writes typed client
//! events into a bounded outbound queue and reads typed server events (or
//! transport failures) from an inbound queue. A transport adapter such as the
//! WebSocket bridge in [`crate::core::realtime::openai::connect`] owns the
//! other ends; tests use [`DuplexChannel::pair`] instead.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::openai::{ClientEvent, ConversationItem, ServerEvent, SessionConfig};
use super::{RealtimeError, RealtimeResult};
use crate::core::audio::pcm16_le_bytes;

/// Default capacity of each direction of the channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Inbound half: server events in receipt order, or a transport failure.
pub type InboundEvents = mpsc::Receiver<RealtimeResult<ServerEvent>>;

// =============================================================================
// Duplex Channel
// =============================================================================

/// Both directions of a session's event stream plus the transport task
/// driving them, if any.
pub struct DuplexChannel {
    outbound: mpsc::Sender<ClientEvent>,
    inbound: Option<InboundEvents>,
    bridge: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl DuplexChannel {
    /// Wrap channel halves with no transport task.
    pub fn new(outbound: mpsc::Sender<ClientEvent>, inbound: InboundEvents) -> Self {
        Self {
            outbound,
            inbound: Some(inbound),
            bridge: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wrap channel halves driven by a transport task that exits when
    /// `shutdown` is cancelled.
    pub fn with_bridge(
        outbound: mpsc::Sender<ClientEvent>,
        inbound: InboundEvents,
        bridge: JoinHandle<()>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound: Some(inbound),
            bridge: Some(bridge),
            shutdown,
        }
    }

    /// In-memory channel and the remote end that drives it.
    pub fn pair(capacity: usize) -> (Self, RemoteEnd) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        (
            Self::new(outbound_tx, inbound_rx),
            RemoteEnd {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }

    /// Handle for sending client events.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.outbound.clone(),
        }
    }

    /// Take the inbound half. Returns `None` once taken.
    pub fn take_inbound(&mut self) -> Option<InboundEvents> {
        self.inbound.take()
    }

    /// Stop the transport task with a bounded wait.
    ///
    /// A task that does not exit within `timeout` is aborted and reported as
    /// [`RealtimeError::Timeout`].
    pub async fn close(&mut self, timeout: Duration) -> RealtimeResult<()> {
        self.shutdown.cancel();
        self.inbound = None;

        let Some(mut bridge) = self.bridge.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut bridge).await {
            Ok(_) => {
                tracing::debug!("Transport task finished");
                Ok(())
            }
            Err(_) => {
                bridge.abort();
                Err(RealtimeError::Timeout(format!(
                    "transport did not close within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Remote End
// =============================================================================

/// Remote side of an in-memory [`DuplexChannel`].
pub struct RemoteEnd {
    /// Events the session sent
    pub outbound: mpsc::Receiver<ClientEvent>,
    /// Events delivered to the session
    pub inbound: mpsc::Sender<RealtimeResult<ServerEvent>>,
}

impl RemoteEnd {
    /// Deliver a server event.
    pub async fn send(&self, event: ServerEvent) -> RealtimeResult<()> {
        self.inbound
            .send(Ok(event))
            .await
            .map_err(|_| RealtimeError::ConnectionClosed("session dropped inbound".to_string()))
    }

    /// Deliver a server event given as JSON.
    pub async fn send_json(&self, value: serde_json::Value) -> RealtimeResult<()> {
        let event = serde_json::from_value(value)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        self.send(event).await
    }

    /// Deliver a transport failure.
    pub async fn fail(&self, error: RealtimeError) -> RealtimeResult<()> {
        self.inbound
            .send(Err(error))
            .await
            .map_err(|_| RealtimeError::ConnectionClosed("session dropped inbound".to_string()))
    }

    /// Next event the session sent.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.outbound.recv().await
    }

    /// All events sent so far, without waiting.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound.try_recv() {
            events.push(event);
        }
        events
    }
}

// =============================================================================
// Event Sender
// =============================================================================

/// Typed helpers for writing client events.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ClientEvent>,
}

impl EventSender {
    /// Wrap an outbound queue.
    pub fn new(tx: mpsc::Sender<ClientEvent>) -> Self {
        Self { tx }
    }

    /// Send a raw client event.
    pub async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        tracing::trace!("Sending {}", event.event_type());
        self.tx
            .send(event)
            .await
            .map_err(|_| RealtimeError::ConnectionClosed("outbound channel closed".to_string()))
    }

    /// Request a session configuration.
    pub async fn configure_session(&self, session: SessionConfig) -> RealtimeResult<()> {
        self.send(ClientEvent::SessionUpdate { session }).await
    }

    /// Append samples to the remote input buffer.
    pub async fn append_audio(&self, samples: &[i16]) -> RealtimeResult<()> {
        self.send(ClientEvent::audio_append(&pcm16_le_bytes(samples)))
            .await
    }

    /// Commit the remote input buffer as a user turn.
    pub async fn commit_audio(&self) -> RealtimeResult<()> {
        self.send(ClientEvent::InputAudioBufferCommit).await
    }

    /// Discard the remote input buffer.
    pub async fn clear_audio(&self) -> RealtimeResult<()> {
        self.send(ClientEvent::InputAudioBufferClear).await
    }

    /// Ask for a response.
    pub async fn create_response(&self) -> RealtimeResult<()> {
        self.send(ClientEvent::ResponseCreate).await
    }

    /// Cancel the response in progress.
    pub async fn cancel_response(&self) -> RealtimeResult<()> {
        self.send(ClientEvent::ResponseCancel).await
    }

    /// Add a user text message.
    pub async fn send_text_message(&self, text: &str) -> RealtimeResult<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await
    }

    /// Add a user audio message from PCM16 bytes.
    pub async fn send_audio_message(&self, pcm16: &[u8]) -> RealtimeResult<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_audio(pcm16),
        })
        .await
    }

    /// Return the output of a tool call.
    pub async fn submit_tool_result(&self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output(call_id, output),
        })
        .await
    }

    /// Underlying outbound queue.
    pub fn raw(&self) -> mpsc::Sender<ClientEvent> {
        self.tx.clone()
    }

    /// Whether the remote side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_directions() {
        let (mut channel, mut remote) = DuplexChannel::pair(8);
        let sender = channel.sender();
        let mut inbound = channel.take_inbound().unwrap();
        assert!(channel.take_inbound().is_none());

        sender.commit_audio().await.unwrap();
        sender.create_response().await.unwrap();
        let sent: Vec<_> = remote.drain().iter().map(|e| e.event_type()).collect();
        assert_eq!(sent, vec!["input_audio_buffer.commit", "response.create"]);

        remote
            .send_json(serde_json::json!({"type": "input_audio_buffer.speech_started"}))
            .await
            .unwrap();
        match inbound.recv().await {
            Some(Ok(ServerEvent::SpeechStarted { .. })) => {}
            other => panic!("Unexpected inbound: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_remote_dropped() {
        let (channel, remote) = DuplexChannel::pair(8);
        drop(remote);
        let sender = channel.sender();
        assert!(sender.is_closed());
        match sender.create_response().await {
            Err(RealtimeError::ConnectionClosed(_)) => {}
            other => panic!("Expected ConnectionClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_waits_for_bridge() {
        let (tx, _rx) = mpsc::channel(1);
        let (_in_tx, in_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let bridge = tokio::spawn(async move { token.cancelled().await });

        let mut channel = DuplexChannel::with_bridge(tx, in_rx, bridge, shutdown);
        channel.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_aborts_stuck_bridge() {
        let (tx, _rx) = mpsc::channel(1);
        let (_in_tx, in_rx) = mpsc::channel(1);
        let bridge = tokio::spawn(std::future::pending::<()>());

        let mut channel =
            DuplexChannel::with_bridge(tx, in_rx, bridge, CancellationToken::new());
        match channel.close(Duration::from_millis(20)).await {
            Err(RealtimeError::Timeout(_)) => {}
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }
}
