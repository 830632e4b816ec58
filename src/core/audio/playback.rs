//! Playback buffer feeding a real-time output device.
//!
//! The device's audio callback runs on its own clock and pulls exactly one
//! block at a time through a [`PlaybackSource`]. The session side pushes
//! decoded chunks through [`PlaybackBuffer::enqueue`] as they arrive from the
//! network. Both sides share one `parking_lot::Mutex` around the queue; the
//! callback holds it only for the duration of a copy.
//!
//! # Behavior
//!
//! - Chunks play in enqueue order, split across block boundaries as needed
//! - When the queue runs dry the block is padded with silence
//! - `stop` discards everything still queued in one step (barge-in)
//! - The frame counter counts real samples only, never padding

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{
    AudioChunk, AudioError, AudioResult, DEFAULT_PLAYBACK_BLOCK_MS, PLAYBACK_SAMPLE_RATE,
    samples_per_block,
};

// =============================================================================
// Output Device
// =============================================================================

/// Real-time audio output device.
///
/// The device is opened with a [`PlaybackSource`] and calls
/// [`PlaybackSource::pull`] from its audio callback while started.
pub trait OutputDevice: Send + 'static {
    /// Begin invoking the audio callback.
    fn start(&mut self) -> AudioResult<()>;

    /// Stop invoking the audio callback. The device may be started again.
    fn stop(&mut self) -> AudioResult<()>;

    /// Release the device. May block; called from a blocking worker.
    fn close(&mut self) -> AudioResult<()>;
}

/// Playback configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Block duration pulled per callback, in ms
    pub block_ms: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            block_ms: DEFAULT_PLAYBACK_BLOCK_MS,
        }
    }
}

impl PlaybackConfig {
    /// Samples per callback block.
    #[inline]
    pub fn block_size(&self) -> usize {
        samples_per_block(self.sample_rate, self.block_ms)
    }
}

/// Snapshot of playback queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Samples waiting to be played
    pub queued_samples: usize,
    /// Chunks waiting to be played (a partially played head counts as one)
    pub queued_chunks: usize,
    /// Real samples delivered since the last frame counter reset
    pub delivered_samples: u64,
    /// Pulls that had to pad with silence
    pub underruns: u64,
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Default)]
struct PlaybackQueue {
    chunks: VecDeque<AudioChunk>,
    /// Samples of the front chunk already consumed
    head_offset: usize,
    queued: usize,
    delivered: u64,
    underruns: u64,
}

impl PlaybackQueue {
    fn push(&mut self, chunk: AudioChunk) {
        self.queued += chunk.len();
        self.chunks.push_back(chunk);
    }

    fn pull(&mut self, out: &mut [i16]) -> usize {
        let mut written = 0;

        while written < out.len() {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let front_len = front.len();
            let remaining = &front.samples()[self.head_offset..];
            let n = remaining.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&remaining[..n]);
            written += n;
            self.head_offset += n;

            if self.head_offset == front_len {
                self.chunks.pop_front();
                self.head_offset = 0;
            }
        }

        if written < out.len() {
            out[written..].fill(0);
            self.underruns += 1;
        }

        self.queued -= written;
        self.delivered += written as u64;
        written
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.head_offset = 0;
        self.queued = 0;
    }

    fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            queued_samples: self.queued,
            queued_chunks: self.chunks.len(),
            delivered_samples: self.delivered,
            underruns: self.underruns,
        }
    }
}

// =============================================================================
// Playback Source
// =============================================================================

/// Callback-side handle to the playback queue.
#[derive(Debug, Clone)]
pub struct PlaybackSource {
    queue: Arc<Mutex<PlaybackQueue>>,
}

impl PlaybackSource {
    /// Fill `out` with the next samples, padding with silence.
    ///
    /// Returns the number of real (non-padding) samples written. Intended to
    /// be called only from the output device's audio callback: it takes the
    /// lock once and never allocates.
    #[inline]
    pub fn pull(&self, out: &mut [i16]) -> usize {
        self.queue.lock().pull(out)
    }
}

// =============================================================================
// Playback Buffer
// =============================================================================

/// Ordered queue of audio chunks driving an output device.
pub struct PlaybackBuffer {
    queue: Arc<Mutex<PlaybackQueue>>,
    device: Option<Box<dyn OutputDevice>>,
    config: PlaybackConfig,
    playing: bool,
}

impl PlaybackBuffer {
    /// Create the queue and open the output device on it.
    ///
    /// `open_device` receives the callback-side source and returns the opened
    /// (not yet started) device.
    pub fn open<F>(config: PlaybackConfig, open_device: F) -> AudioResult<Self>
    where
        F: FnOnce(PlaybackSource) -> AudioResult<Box<dyn OutputDevice>>,
    {
        let queue = Arc::new(Mutex::new(PlaybackQueue::default()));
        let device = open_device(PlaybackSource {
            queue: queue.clone(),
        })?;

        tracing::debug!(
            "Playback buffer opened ({} Hz, {} samples per block)",
            config.sample_rate,
            config.block_size()
        );

        Ok(Self {
            queue,
            device: Some(device),
            config,
            playing: false,
        })
    }

    /// Append a chunk, starting the device if it is idle.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> AudioResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        self.queue.lock().push(chunk);

        if !self.playing {
            let device = self
                .device
                .as_mut()
                .ok_or_else(|| AudioError::DeviceUnavailable("output device closed".to_string()))?;
            device.start()?;
            self.playing = true;
            tracing::debug!("Playback started");
        }

        Ok(())
    }

    /// Stop the device and discard all queued samples.
    ///
    /// The queue is cleared even when the device fails to stop.
    pub fn stop(&mut self) -> AudioResult<()> {
        let result = match self.device.as_mut() {
            Some(device) if self.playing => device.stop(),
            _ => Ok(()),
        };
        self.playing = false;

        let discarded = {
            let mut queue = self.queue.lock();
            let discarded = queue.queued;
            queue.clear();
            discarded
        };

        if discarded > 0 {
            tracing::debug!("Playback stopped, discarded {} queued samples", discarded);
        }

        result
    }

    /// Reset the delivered-samples counter.
    pub fn reset_frame_counter(&self) {
        self.queue.lock().delivered = 0;
    }

    /// Real samples delivered to the device since the last reset.
    pub fn frame_count(&self) -> u64 {
        self.queue.lock().delivered
    }

    /// Samples waiting to be played.
    pub fn queued_samples(&self) -> usize {
        self.queue.lock().queued
    }

    /// Chunks waiting to be played.
    pub fn queued_chunks(&self) -> usize {
        self.queue.lock().chunks.len()
    }

    /// Whether the device is currently started.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PlaybackStats {
        self.queue.lock().stats()
    }

    /// Playback configuration.
    pub fn config(&self) -> PlaybackConfig {
        self.config
    }

    /// Another callback-side handle onto the same queue.
    pub fn source(&self) -> PlaybackSource {
        PlaybackSource {
            queue: self.queue.clone(),
        }
    }

    /// Stop playback and close the device with a bounded wait.
    ///
    /// The close runs on a detached thread. One that does not finish within
    /// `timeout` is abandoned there and reported as [`AudioError::Timeout`];
    /// neither this call nor runtime shutdown waits on it.
    pub async fn shutdown(&mut self, timeout: Duration) -> AudioResult<()> {
        let stop_result = self.stop();

        let Some(mut device) = self.device.take() else {
            return stop_result;
        };

        let (done_tx, done_rx) = oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("rtvoice-output-close".to_string())
            .spawn(move || {
                let _ = done_tx.send(device.close());
            });

        let close_result = match spawned {
            Err(e) => Err(AudioError::CloseFailed(e.to_string())),
            Ok(_) => match tokio::time::timeout(timeout, done_rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(AudioError::CloseFailed(
                    "close thread exited without a result".to_string(),
                )),
                Err(_) => Err(AudioError::Timeout(format!(
                    "output device close exceeded {}ms",
                    timeout.as_millis()
                ))),
            },
        };

        if close_result.is_ok() {
            tracing::debug!("Playback device closed");
        }
        stop_result.and(close_result)
    }
}

impl Drop for PlaybackBuffer {
    fn drop(&mut self) {
        if let Some(device) = self.device.as_mut()
            && self.playing
            && let Err(e) = device.stop()
        {
            tracing::warn!("Failed to stop output device on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for PlaybackBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackBuffer")
            .field("config", &self.config)
            .field("playing", &self.playing)
            .field("open", &self.device.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        starts: AtomicUsize,
        stops: AtomicUsize,
        closes: AtomicUsize,
    }

    struct CountingDevice(Arc<Calls>);

    impl OutputDevice for CountingDevice {
        fn start(&mut self) -> AudioResult<()> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) -> AudioResult<()> {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) -> AudioResult<()> {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn open_buffer() -> (PlaybackBuffer, PlaybackSource, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let device_calls = calls.clone();
        let mut source = None;
        let buffer = PlaybackBuffer::open(PlaybackConfig::default(), |s| {
            source = Some(s);
            Ok(Box::new(CountingDevice(device_calls)) as Box<dyn OutputDevice>)
        })
        .unwrap();
        (buffer, source.unwrap(), calls)
    }

    #[test]
    fn test_block_size() {
        assert_eq!(PlaybackConfig::default().block_size(), 1200);
    }

    #[test]
    fn test_pull_splits_chunks() {
        let (mut buffer, source, _) = open_buffer();
        buffer.enqueue(AudioChunk::new(vec![1, 2, 3], 24000)).unwrap();
        buffer.enqueue(AudioChunk::new(vec![4, 5], 24000)).unwrap();

        let mut out = [0i16; 4];
        assert_eq!(source.pull(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(buffer.queued_samples(), 1);
        assert_eq!(buffer.queued_chunks(), 1);

        let mut out = [9i16; 3];
        assert_eq!(source.pull(&mut out), 1);
        assert_eq!(out, [5, 0, 0]);
        assert_eq!(buffer.queued_samples(), 0);
    }

    #[test]
    fn test_frame_counter_excludes_padding() {
        let (mut buffer, source, _) = open_buffer();
        buffer.enqueue(AudioChunk::new(vec![7; 10], 24000)).unwrap();

        let mut out = [0i16; 16];
        source.pull(&mut out);
        source.pull(&mut out);
        assert_eq!(buffer.frame_count(), 10);
        assert_eq!(buffer.stats().underruns, 2);

        buffer.reset_frame_counter();
        assert_eq!(buffer.frame_count(), 0);
    }

    #[test]
    fn test_enqueue_starts_device_once() {
        let (mut buffer, _source, calls) = open_buffer();
        assert!(!buffer.is_playing());

        buffer.enqueue(AudioChunk::new(vec![1], 24000)).unwrap();
        buffer.enqueue(AudioChunk::new(vec![2], 24000)).unwrap();

        assert!(buffer.is_playing());
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let (mut buffer, _source, calls) = open_buffer();
        buffer.enqueue(AudioChunk::new(Vec::new(), 24000)).unwrap();
        assert!(!buffer.is_playing());
        assert_eq!(calls.starts.load(Ordering::SeqCst), 0);
        assert_eq!(buffer.queued_chunks(), 0);
    }

    #[test]
    fn test_stop_clears_queue() {
        let (mut buffer, source, calls) = open_buffer();
        buffer.enqueue(AudioChunk::new(vec![1; 100], 24000)).unwrap();
        buffer.enqueue(AudioChunk::new(vec![2; 100], 24000)).unwrap();

        let mut out = [0i16; 30];
        source.pull(&mut out);

        buffer.stop().unwrap();
        assert!(!buffer.is_playing());
        assert_eq!(buffer.queued_samples(), 0);
        assert_eq!(calls.stops.load(Ordering::SeqCst), 1);

        let mut out = [5i16; 8];
        assert_eq!(source.pull(&mut out), 0);
        assert_eq!(out, [0; 8]);

        // Restarts after a stop
        buffer.enqueue(AudioChunk::new(vec![3], 24000)).unwrap();
        assert_eq!(calls.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_device() {
        let (mut buffer, _source, calls) = open_buffer();
        buffer.enqueue(AudioChunk::new(vec![1; 10], 24000)).unwrap();

        buffer.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(calls.closes.load(Ordering::SeqCst), 1);

        // Second shutdown is a no-op
        buffer.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(calls.closes.load(Ordering::SeqCst), 1);

        match buffer.enqueue(AudioChunk::new(vec![1], 24000)) {
            Err(AudioError::DeviceUnavailable(_)) => {}
            other => panic!("Expected DeviceUnavailable, got {:?}", other),
        }
    }
}
