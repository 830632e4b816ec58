//! Audio primitives for the voice session engine.
//!
//! All audio handled here is signed 16-bit mono PCM. The wire representation is
//! little-endian bytes; the in-memory representation is `Vec<i16>` so the
//! playback callback can copy samples straight into the device buffer.
//!
//! # Components
//!
//! - [`PlaybackBuffer`]: ordered queue feeding a real-time output device
//! - [`CaptureLoop`]: gated reader of fixed-size microphone blocks
//! - `cpal_device` (feature `device-audio`): hardware devices backed by cpal

pub mod capture;
#[cfg(feature = "device-audio")]
pub mod cpal_device;
pub mod playback;

use thiserror::Error;

pub use capture::{
    CaptureConfig, CaptureLoop, CaptureStats, InputDevice, RecordingState, RecordingSwitch,
    recording_channel,
};
pub use playback::{
    OutputDevice, PlaybackBuffer, PlaybackConfig, PlaybackSource, PlaybackStats,
};

/// Sample rate of audio produced by the remote service.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Default playback block duration (50 ms).
pub const DEFAULT_PLAYBACK_BLOCK_MS: u32 = 50;

/// Default capture block duration (20 ms).
pub const DEFAULT_CAPTURE_BLOCK_MS: u32 = 20;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by audio devices and PCM handling.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Device could not be opened or configured
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Device failed to start
    #[error("Failed to start audio device: {0}")]
    StartFailed(String),

    /// Device failed to stop
    #[error("Failed to stop audio device: {0}")]
    StopFailed(String),

    /// Device failed while reading samples
    #[error("Audio read failed: {0}")]
    ReadFailed(String),

    /// Device failed to close
    #[error("Failed to close audio device: {0}")]
    CloseFailed(String),

    /// Byte payload is not valid PCM16
    #[error("Malformed PCM16 payload: {0}")]
    MalformedPcm(String),

    /// Unsupported audio format
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Device operation exceeded its time bound
    #[error("Audio device operation timed out: {0}")]
    Timeout(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

// =============================================================================
// Audio Chunk
// =============================================================================

/// An immutable block of mono PCM16 samples.
///
/// A chunk is produced once (decoded from the wire or read from a device),
/// moved into whichever queue holds it, and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioChunk {
    /// Create a chunk from samples.
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode little-endian PCM16 bytes.
    ///
    /// Fails if the byte count is odd.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32) -> AudioResult<Self> {
        if bytes.len() % 2 != 0 {
            return Err(AudioError::MalformedPcm(format!(
                "odd byte length {}",
                bytes.len()
            )));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self::new(samples, sample_rate))
    }

    /// Encode as little-endian PCM16 bytes.
    pub fn to_pcm16_le(&self) -> Vec<u8> {
        pcm16_le_bytes(&self.samples)
    }

    /// Samples in this chunk.
    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the chunk holds no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Consume the chunk, returning its samples.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Encode samples as little-endian PCM16 bytes.
pub fn pcm16_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Number of samples in a block of `block_ms` at `sample_rate`.
#[inline]
pub fn samples_per_block(sample_rate: u32, block_ms: u32) -> usize {
    (sample_rate as u64 * block_ms as u64 / 1000) as usize
}

// =============================================================================
// Tests
// =============================================================================
