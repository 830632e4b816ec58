//! Scripted audio devices.
//!
//! `MockOutput` records lifecycle calls and hands the test the callback-side
//! source so it can pull samples the way a hardware callback would.
//! `MockInput` serves samples the test pushes and can be armed to fail.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use rtvoice::core::audio::{
    AudioError, AudioResult, InputDevice, OutputDevice, PlaybackSource,
};

/// Lifecycle call counts shared with the test.
#[derive(Debug, Default)]
pub struct DeviceCalls {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub closes: AtomicUsize,
}

impl DeviceCalls {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Output
// =============================================================================

/// Test-side view of a [`MockOutput`].
#[derive(Debug, Clone, Default)]
pub struct OutputHandle {
    pub calls: Arc<DeviceCalls>,
    source: Arc<Mutex<Option<PlaybackSource>>>,
    close_delay: Arc<Mutex<Option<Duration>>>,
}

impl OutputHandle {
    /// Pull `n` samples as the device callback would.
    pub fn pull(&self, n: usize) -> (Vec<i16>, usize) {
        let mut out = vec![i16::MIN; n];
        let written = self
            .source
            .lock()
            .as_ref()
            .expect("output device was never opened")
            .pull(&mut out);
        (out, written)
    }

    pub fn is_opened(&self) -> bool {
        self.source.lock().is_some()
    }

    /// Make `close` block its thread for `delay`, like a wedged driver.
    pub fn stall_close(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    /// Opener suitable for `PlaybackBuffer::open` and the session builder.
    pub fn opener(&self) -> impl FnOnce(PlaybackSource) -> AudioResult<Box<dyn OutputDevice>> + Send + 'static {
        let handle = self.clone();
        move |source| {
            *handle.source.lock() = Some(source);
            Ok(Box::new(MockOutput {
                calls: handle.calls.clone(),
                close_delay: handle.close_delay.clone(),
            }) as Box<dyn OutputDevice>)
        }
    }
}

/// Output device that only counts calls.
pub struct MockOutput {
    calls: Arc<DeviceCalls>,
    close_delay: Arc<Mutex<Option<Duration>>>,
}

impl OutputDevice for MockOutput {
    fn start(&mut self) -> AudioResult<()> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> AudioResult<()> {
        let delay = *self.close_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Input
// =============================================================================

#[derive(Debug, Default)]
struct InputScript {
    pending: VecDeque<i16>,
    failure: Option<String>,
}

/// Test-side view of a [`MockInput`].
#[derive(Debug, Clone)]
pub struct InputHandle {
    pub calls: Arc<DeviceCalls>,
    script: Arc<Mutex<InputScript>>,
    ready: Arc<Notify>,
}

impl InputHandle {
    /// Make samples available to the next reads.
    pub fn push(&self, samples: &[i16]) {
        self.script.lock().pending.extend(samples.iter().copied());
        self.ready.notify_one();
    }

    /// Fail the next read with `message`.
    pub fn fail(&self, message: &str) {
        self.script.lock().failure = Some(message.to_string());
        self.ready.notify_one();
    }

    /// Samples pushed but not yet read.
    pub fn pending(&self) -> usize {
        self.script.lock().pending.len()
    }

    /// Wait until the capture side has read everything pushed so far.
    pub async fn drained(&self) {
        wait_until(|| self.pending() == 0).await;
    }
}

/// Input device backed by a script the test writes to.
pub struct MockInput {
    calls: Arc<DeviceCalls>,
    script: Arc<Mutex<InputScript>>,
    ready: Arc<Notify>,
}

impl MockInput {
    pub fn new() -> (Self, InputHandle) {
        let handle = InputHandle {
            calls: Arc::new(DeviceCalls::default()),
            script: Arc::new(Mutex::new(InputScript::default())),
            ready: Arc::new(Notify::new()),
        };
        (
            Self {
                calls: handle.calls.clone(),
                script: handle.script.clone(),
                ready: handle.ready.clone(),
            },
            handle,
        )
    }
}

impl InputDevice for MockInput {
    fn start(&mut self) -> AudioResult<()> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn available(&self) -> usize {
        let script = self.script.lock();
        if script.failure.is_some() {
            return usize::MAX;
        }
        script.pending.len()
    }

    fn read(&mut self, samples: usize) -> AudioResult<Vec<i16>> {
        let mut script = self.script.lock();
        if let Some(message) = script.failure.take() {
            return Err(AudioError::ReadFailed(message));
        }
        let n = samples.min(script.pending.len());
        Ok(script.pending.drain(..n).collect())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn readiness(&self) -> Option<Arc<Notify>> {
        Some(self.ready.clone())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}
