//! Microphone capture loop.
//!
//! Reads fixed-size blocks from an [`InputDevice`] and forwards them as
//! `input_audio_buffer.append` events while recording is on. Blocks that
//! become ready while recording is off are read and dropped so the device
//! buffer never backs up.
//!
//! The loop never spins: when fewer than one block of samples is available it
//! waits on the device's readiness notifier (if any), a bounded poll interval,
//! a recording transition, or cancellation, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{
    AudioResult, DEFAULT_CAPTURE_BLOCK_MS, PLAYBACK_SAMPLE_RATE, pcm16_le_bytes, samples_per_block,
};
use crate::core::realtime::openai::ClientEvent;
use crate::core::realtime::{RealtimeError, RealtimeResult};

// =============================================================================
// Input Device
// =============================================================================

/// Audio input device producing mono PCM16 samples.
pub trait InputDevice: Send + 'static {
    /// Begin capturing.
    fn start(&mut self) -> AudioResult<()>;

    /// Samples ready to be read without blocking.
    fn available(&self) -> usize;

    /// Read exactly `samples` samples. Only called when `available()` is at
    /// least `samples`.
    fn read(&mut self, samples: usize) -> AudioResult<Vec<i16>>;

    /// Stop capturing.
    fn stop(&mut self) -> AudioResult<()>;

    /// Notifier signalled when new samples arrive, if the device has one.
    fn readiness(&self) -> Option<Arc<Notify>> {
        None
    }
}

/// Capture configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Block duration in ms
    pub block_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            block_ms: DEFAULT_CAPTURE_BLOCK_MS,
        }
    }
}

impl CaptureConfig {
    /// Samples per block.
    #[inline]
    pub fn block_size(&self) -> usize {
        samples_per_block(self.sample_rate, self.block_ms)
    }

    /// Upper bound on a readiness wait (half a block, at least 1 ms).
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis((self.block_ms as u64 / 2).max(1))
    }
}

// =============================================================================
// Recording State
// =============================================================================

/// Create a recording flag, initially `on`.
pub fn recording_channel(on: bool) -> (RecordingSwitch, RecordingState) {
    let (tx, rx) = watch::channel(on);
    (RecordingSwitch { tx }, RecordingState { rx })
}

/// Writer half of the recording flag.
#[derive(Debug)]
pub struct RecordingSwitch {
    tx: watch::Sender<bool>,
}

impl RecordingSwitch {
    /// Set the flag. Returns `true` if the value changed.
    pub fn set(&self, on: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == on {
                false
            } else {
                *current = on;
                true
            }
        })
    }

    /// Current value.
    pub fn is_on(&self) -> bool {
        *self.tx.borrow()
    }

    /// Another reader of the flag.
    pub fn subscribe(&self) -> RecordingState {
        RecordingState {
            rx: self.tx.subscribe(),
        }
    }
}

/// Reader half of the recording flag.
#[derive(Debug, Clone)]
pub struct RecordingState {
    rx: watch::Receiver<bool>,
}

impl RecordingState {
    /// Current value.
    pub fn is_on(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition. Errors once the switch is dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

// =============================================================================
// Capture Loop
// =============================================================================

/// Counters reported when the capture loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Blocks sent as append events
    pub blocks_sent: u64,
    /// Blocks read while recording was off
    pub blocks_discarded: u64,
}

/// Started input device; stopped when dropped.
struct ActiveInput {
    device: Box<dyn InputDevice>,
}

impl ActiveInput {
    fn start(mut device: Box<dyn InputDevice>) -> AudioResult<Self> {
        device.start()?;
        Ok(Self { device })
    }
}

impl Drop for ActiveInput {
    fn drop(&mut self) {
        if let Err(e) = self.device.stop() {
            tracing::warn!("Failed to stop input device: {}", e);
        } else {
            tracing::debug!("Input device stopped");
        }
    }
}

/// Gated reader of microphone blocks.
pub struct CaptureLoop {
    device: Box<dyn InputDevice>,
    config: CaptureConfig,
    recording: RecordingState,
    outbound: mpsc::Sender<ClientEvent>,
}

impl CaptureLoop {
    /// Create a capture loop over `device`, sending into `outbound`.
    pub fn new(
        device: Box<dyn InputDevice>,
        config: CaptureConfig,
        recording: RecordingState,
        outbound: mpsc::Sender<ClientEvent>,
    ) -> Self {
        Self {
            device,
            config,
            recording,
            outbound,
        }
    }

    /// Run until cancelled, the outbound channel closes, or the device fails.
    ///
    /// The device is started on entry and stopped on every exit path,
    /// including when this future is dropped.
    pub async fn run(self, cancel: CancellationToken) -> RealtimeResult<CaptureStats> {
        let Self {
            device,
            config,
            mut recording,
            outbound,
        } = self;

        let mut input = ActiveInput::start(device)?;
        let readiness = input.device.readiness();
        let block = config.block_size();
        let poll = config.poll_interval();
        let mut switch_open = true;
        let mut stats = CaptureStats::default();

        tracing::debug!("Capture loop started ({} samples per block)", block);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if input.device.available() < block {
                let ready = async {
                    match &readiness {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ready => {}
                    _ = tokio::time::sleep(poll) => {}
                    changed = recording.changed(), if switch_open => {
                        if changed.is_err() {
                            switch_open = false;
                        }
                    }
                }
                continue;
            }

            let samples = input.device.read(block)?;

            if !recording.is_on() {
                stats.blocks_discarded += 1;
                continue;
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = outbound.reserve() => permit.map_err(|_| {
                    RealtimeError::ConnectionClosed("outbound channel closed".to_string())
                })?,
            };

            // Recording may have been switched off while waiting for capacity.
            if !recording.is_on() {
                stats.blocks_discarded += 1;
                continue;
            }

            permit.send(ClientEvent::audio_append(&pcm16_le_bytes(&samples)));
            stats.blocks_sent += 1;
            tracing::trace!("Sent capture block {}", stats.blocks_sent);
        }

        tracing::debug!(
            "Capture loop finished: {} sent, {} discarded",
            stats.blocks_sent,
            stats.blocks_discarded
        );
        Ok(stats)
    }
}

// =============================================================================
// Tests
// =============================================================================
