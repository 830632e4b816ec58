//! Hardware audio devices backed by cpal.
//!
//! cpal streams are not `Send`, so every stream lives on a dedicated owner
//! thread. The device handles exposed here only hold a command channel to that
//! thread and are therefore safe to move between tasks.
//!
//! Streams run at the session sample rate and use the device's native channel
//! count and sample format (f32, i16 or u16): playback duplicates the mono
//! signal onto every channel, capture keeps the first channel. No resampling is
//! performed; a device that cannot open at the requested rate is reported as
//! unavailable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;

use super::{
    AudioError, AudioResult, CaptureConfig, InputDevice, OutputDevice, PlaybackConfig,
    PlaybackSource,
};

/// How long a device command may take before it is reported as timed out.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Capture buffer bound, in seconds of audio.
const CAPTURE_BUFFER_SECONDS: usize = 2;

// =============================================================================
// Stream Owner Thread
// =============================================================================

enum StreamCommand {
    Play(std_mpsc::Sender<AudioResult<()>>),
    Pause(std_mpsc::Sender<AudioResult<()>>),
    Close,
}

/// Handle to the thread owning a cpal stream.
struct StreamThread {
    commands: std_mpsc::Sender<StreamCommand>,
    handle: Option<JoinHandle<()>>,
    label: &'static str,
}

impl StreamThread {
    /// Spawn the owner thread and build the stream on it.
    fn spawn<B>(label: &'static str, build: B) -> AudioResult<Self>
    where
        B: FnOnce() -> AudioResult<cpal::Stream> + Send + 'static,
    {
        let (commands, command_rx) = std_mpsc::channel::<StreamCommand>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<AudioResult<()>>();

        let handle = std::thread::Builder::new()
            .name(format!("rtvoice-{label}"))
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Play(reply) => {
                            let result = stream
                                .play()
                                .map_err(|e| AudioError::StartFailed(e.to_string()));
                            let _ = reply.send(result);
                        }
                        StreamCommand::Pause(reply) => {
                            let result = stream
                                .pause()
                                .map_err(|e| AudioError::StopFailed(e.to_string()));
                            let _ = reply.send(result);
                        }
                        StreamCommand::Close => break,
                    }
                }
                drop(stream);
            })
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.recv_timeout(COMMAND_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                commands,
                handle: Some(handle),
                label,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Timeout(format!("{label} stream did not open"))),
        }
    }

    fn request(
        &self,
        command: impl FnOnce(std_mpsc::Sender<AudioResult<()>>) -> StreamCommand,
    ) -> AudioResult<()> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        self.commands.send(command(reply_tx)).map_err(|_| {
            AudioError::DeviceUnavailable(format!("{} stream thread exited", self.label))
        })?;
        match reply_rx.recv_timeout(COMMAND_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(AudioError::Timeout(format!(
                "{} stream command timed out",
                self.label
            ))),
        }
    }

    fn play(&self) -> AudioResult<()> {
        self.request(StreamCommand::Play)
    }

    fn pause(&self) -> AudioResult<()> {
        self.request(StreamCommand::Pause)
    }

    /// Drop the stream and join its thread.
    fn close(&mut self) -> AudioResult<()> {
        let _ = self.commands.send(StreamCommand::Close);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| AudioError::CloseFailed(format!("{} stream thread panicked", self.label)))?;
        }
        Ok(())
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        // Detach rather than join; closing may block on some hosts.
        let _ = self.commands.send(StreamCommand::Close);
    }
}

/// Fixed buffer of `block` frames per callback.
fn stream_config(channels: u16, sample_rate: u32, block: usize) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Fixed(block as u32),
    }
}

fn unsupported(format: SampleFormat) -> AudioError {
    AudioError::DeviceUnavailable(format!("unsupported sample format {format:?}"))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    source: PlaybackSource,
    block: usize,
) -> AudioResult<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let width = config.channels as usize;
    let mut scratch = vec![0i16; block];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / width;
                if scratch.len() < frames {
                    scratch.resize(frames, 0);
                }
                source.pull(&mut scratch[..frames]);
                for (frame, sample) in data.chunks_mut(width).zip(&scratch[..frames]) {
                    frame.fill(T::from_sample(*sample));
                }
            },
            |err| tracing::warn!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<CaptureBuffer>>,
    ready: Arc<Notify>,
    capacity: usize,
) -> AudioResult<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let width = config.channels as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                {
                    let mut buffer = buffer.lock();
                    for frame in data.chunks(width) {
                        if buffer.samples.len() == capacity {
                            buffer.samples.pop_front();
                            buffer.overflowed += 1;
                        }
                        buffer.samples.push_back(i16::from_sample(frame[0]));
                    }
                }
                ready.notify_one();
            },
            |err| tracing::warn!("Input stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

// =============================================================================
// Output
// =============================================================================

/// Default output device playing from a [`PlaybackSource`].
pub struct CpalOutput {
    stream: StreamThread,
}

impl CpalOutput {
    /// Open the default output device.
    pub fn open(source: PlaybackSource, config: PlaybackConfig) -> AudioResult<Self> {
        let stream = StreamThread::spawn("playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceUnavailable("no output device".to_string()))?;
            let native = device
                .default_output_config()
                .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
            let (channels, format) = (native.channels(), native.sample_format());

            tracing::info!(
                "Using output device: {} ({} channels, {:?})",
                device.name().unwrap_or_else(|_| "unknown".to_string()),
                channels,
                format
            );

            let block = config.block_size();
            let stream_config = stream_config(channels, config.sample_rate, block);
            match format {
                SampleFormat::F32 => build_output::<f32>(&device, &stream_config, source, block),
                SampleFormat::I16 => build_output::<i16>(&device, &stream_config, source, block),
                SampleFormat::U16 => build_output::<u16>(&device, &stream_config, source, block),
                other => Err(unsupported(other)),
            }
        })?;

        Ok(Self { stream })
    }
}

impl OutputDevice for CpalOutput {
    fn start(&mut self) -> AudioResult<()> {
        self.stream.play()
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.stream.pause()
    }

    fn close(&mut self) -> AudioResult<()> {
        self.stream.close()
    }
}

// =============================================================================
// Input
// =============================================================================

#[derive(Debug, Default)]
struct CaptureBuffer {
    samples: VecDeque<i16>,
    overflowed: u64,
}

/// Default input device buffering samples for the capture loop.
pub struct CpalInput {
    stream: StreamThread,
    buffer: Arc<Mutex<CaptureBuffer>>,
    ready: Arc<Notify>,
}

impl CpalInput {
    /// Open the default input device.
    pub fn open(config: CaptureConfig) -> AudioResult<Self> {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let ready = Arc::new(Notify::new());
        let capacity = config.sample_rate as usize * CAPTURE_BUFFER_SECONDS;

        let stream = {
            let buffer = buffer.clone();
            let ready = ready.clone();
            StreamThread::spawn("capture", move || {
                let device = cpal::default_host()
                    .default_input_device()
                    .ok_or_else(|| AudioError::DeviceUnavailable("no input device".to_string()))?;
                let native = device
                    .default_input_config()
                    .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
                let (channels, format) = (native.channels(), native.sample_format());

                tracing::info!(
                    "Using input device: {} ({} channels, {:?})",
                    device.name().unwrap_or_else(|_| "unknown".to_string()),
                    channels,
                    format
                );

                let stream_config =
                    stream_config(channels, config.sample_rate, config.block_size());
                match format {
                    SampleFormat::F32 => {
                        build_input::<f32>(&device, &stream_config, buffer, ready, capacity)
                    }
                    SampleFormat::I16 => {
                        build_input::<i16>(&device, &stream_config, buffer, ready, capacity)
                    }
                    SampleFormat::U16 => {
                        build_input::<u16>(&device, &stream_config, buffer, ready, capacity)
                    }
                    other => Err(unsupported(other)),
                }
            })?
        };

        Ok(Self {
            stream,
            buffer,
            ready,
        })
    }
}

impl InputDevice for CpalInput {
    fn start(&mut self) -> AudioResult<()> {
        self.stream.play()
    }

    fn available(&self) -> usize {
        self.buffer.lock().samples.len()
    }

    fn read(&mut self, samples: usize) -> AudioResult<Vec<i16>> {
        let mut buffer = self.buffer.lock();
        if buffer.samples.len() < samples {
            return Err(AudioError::ReadFailed(format!(
                "requested {} samples, {} available",
                samples,
                buffer.samples.len()
            )));
        }
        Ok(buffer.samples.drain(..samples).collect())
    }

    fn stop(&mut self) -> AudioResult<()> {
        let result = self.stream.pause();
        let mut buffer = self.buffer.lock();
        if buffer.overflowed > 0 {
            tracing::warn!("Capture buffer overflowed, {} samples dropped", buffer.overflowed);
        }
        buffer.samples.clear();
        buffer.overflowed = 0;
        result
    }

    fn readiness(&self) -> Option<Arc<Notify>> {
        Some(self.ready.clone())
    }
}

// =============================================================================
// Device Listing
// =============================================================================

/// Audio devices known to the default host.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceList {
    pub host: String,
    pub default_input: Option<String>,
    pub default_output: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// List input and output devices of the default host.
pub fn list_devices() -> AudioResult<DeviceList> {
    let host = cpal::default_host();

    let inputs = host
        .input_devices()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(DeviceList {
        host: host.id().name().to_string(),
        default_input: host.default_input_device().and_then(|d| d.name().ok()),
        default_output: host.default_output_device().and_then(|d| d.name().ok()),
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_counts_frames() {
        let config = stream_config(2, 24000, 1200);
        assert_eq!(config.channels, 2);
        assert!(matches!(config.buffer_size, BufferSize::Fixed(1200)));
    }

    #[test]
    fn test_sample_format_conversions() {
        assert_eq!(u16::from_sample(0i16), 32768);
        assert_eq!(i16::from_sample(32768u16), 0);
        assert_eq!(f32::from_sample(i16::MIN), -1.0);
        assert_eq!(i16::from_sample(0.0f32), 0);
    }
}
