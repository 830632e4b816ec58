//! Playback buffer integration tests.
//!
//! Drive a `PlaybackBuffer` through a scripted output device, pulling samples
//! the way a hardware callback does.

mod fixtures;

use std::time::{Duration, Instant};

use fixtures::*;
use rtvoice::core::audio::{AudioChunk, AudioError, PlaybackBuffer, PlaybackConfig};

fn open(handle: &OutputHandle) -> PlaybackBuffer {
    PlaybackBuffer::open(PlaybackConfig::default(), handle.opener()).unwrap()
}

/// Samples come out in enqueue order regardless of how pulls straddle chunks.
#[test]
fn test_pull_preserves_order_across_chunks() {
    let handle = OutputHandle::default();
    let mut playback = open(&handle);

    let first = generate_ramp(0, 300);
    let second = generate_ramp(300, 500);
    let third = generate_ramp(800, 200);
    for samples in [&first, &second, &third] {
        playback
            .enqueue(AudioChunk::new(samples.clone(), SAMPLE_RATE))
            .unwrap();
    }
    assert_eq!(playback.queued_chunks(), 3);

    let mut played = Vec::new();
    for block in [128, 512, 7, 353] {
        let (out, written) = handle.pull(block);
        assert_eq!(written, block);
        played.extend_from_slice(&out);
    }

    assert_eq!(played, generate_ramp(0, 1000));
    assert_eq!(playback.queued_samples(), 0);
    assert_eq!(playback.frame_count(), 1000);
}

/// A short queue is padded with silence and only real samples are counted.
#[test]
fn test_underrun_pads_with_silence() {
    let handle = OutputHandle::default();
    let mut playback = open(&handle);

    let tone = generate_a440_tone(100);
    playback
        .enqueue(AudioChunk::new(tone.clone(), SAMPLE_RATE))
        .unwrap();

    let (out, written) = handle.pull(MS_50);
    assert_eq!(written, 100);
    assert_eq!(&out[..100], tone.as_slice());
    assert!(out[100..].iter().all(|&s| s == 0));

    let stats = playback.stats();
    assert_eq!(stats.delivered_samples, 100);
    assert_eq!(stats.underruns, 1);
}

/// Stopping drops everything queued; the device only hears silence afterwards.
#[test]
fn test_stop_then_pull_yields_silence() {
    let handle = OutputHandle::default();
    let mut playback = open(&handle);

    for i in 0..3 {
        playback
            .enqueue(AudioChunk::new(generate_ramp(i * MS_50, MS_50), SAMPLE_RATE))
            .unwrap();
    }
    assert_eq!(handle.calls.starts(), 1);
    assert!(playback.is_playing());

    playback.stop().unwrap();
    assert_eq!(handle.calls.stops(), 1);
    assert_eq!(playback.queued_chunks(), 0);
    assert!(!playback.is_playing());

    let (out, written) = handle.pull(MS_20);
    assert_eq!(written, 0);
    assert_eq!(out, generate_silence(MS_20));

    // The next response restarts the device.
    playback
        .enqueue(AudioChunk::new(generate_a440_tone(MS_20), SAMPLE_RATE))
        .unwrap();
    assert_eq!(handle.calls.starts(), 2);
}

/// Stopping an idle buffer does not touch the device.
#[test]
fn test_stop_when_idle_is_noop() {
    let handle = OutputHandle::default();
    let mut playback = open(&handle);

    playback.stop().unwrap();
    assert_eq!(handle.calls.stops(), 0);
}

/// A producer and a real-time consumer running concurrently never reorder
/// or lose samples.
#[test]
fn test_concurrent_enqueue_and_pull() {
    const CHUNKS: usize = 200;
    const CHUNK_LEN: usize = 120;
    const TOTAL: usize = CHUNKS * CHUNK_LEN;

    let handle = OutputHandle::default();
    let mut playback = open(&handle);

    let consumer = {
        let handle = handle.clone();
        std::thread::spawn(move || {
            let mut played = Vec::with_capacity(TOTAL);
            while played.len() < TOTAL {
                let (out, written) = handle.pull(97);
                played.extend_from_slice(&out[..written]);
                if written == 0 {
                    std::thread::yield_now();
                }
            }
            played
        })
    };

    for i in 0..CHUNKS {
        playback
            .enqueue(AudioChunk::new(
                generate_ramp(i * CHUNK_LEN, CHUNK_LEN),
                SAMPLE_RATE,
            ))
            .unwrap();
    }

    let played = consumer.join().unwrap();
    assert_eq!(played, generate_ramp(0, TOTAL));
}

/// Shutdown stops and closes the device; later enqueues are rejected.
#[tokio::test]
async fn test_shutdown_closes_device() {
    let handle = OutputHandle::default();
    let mut playback = open(&handle);
    playback
        .enqueue(AudioChunk::new(generate_a440_tone(MS_100), SAMPLE_RATE))
        .unwrap();

    playback.shutdown(Duration::from_millis(500)).await.unwrap();
    assert_eq!(handle.calls.stops(), 1);
    assert_eq!(handle.calls.closes(), 1);
    assert_eq!(playback.queued_samples(), 0);

    match playback.enqueue(AudioChunk::new(generate_a440_tone(10), SAMPLE_RATE)) {
        Err(AudioError::DeviceUnavailable(_)) => {}
        other => panic!("Expected DeviceUnavailable, got {:?}", other),
    }

    // A second shutdown has nothing left to close.
    playback.shutdown(Duration::from_millis(500)).await.unwrap();
    assert_eq!(handle.calls.closes(), 1);
}

/// A wedged device close is abandoned once the bound expires.
#[tokio::test]
async fn test_stuck_close_times_out() {
    let handle = OutputHandle::default();
    handle.stall_close(Duration::from_secs(3));
    let mut playback = open(&handle);
    playback
        .enqueue(AudioChunk::new(generate_a440_tone(MS_20), SAMPLE_RATE))
        .unwrap();

    let started = Instant::now();
    match playback.shutdown(Duration::from_millis(50)).await {
        Err(AudioError::Timeout(_)) => {}
        other => panic!("Expected Timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(handle.calls.stops(), 1);
    assert_eq!(handle.calls.closes(), 0);
}

/// The abandoned close does not keep the runtime from shutting down.
#[test]
fn test_stuck_close_does_not_hold_runtime() {
    let handle = OutputHandle::default();
    handle.stall_close(Duration::from_secs(3));

    let started = Instant::now();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(async {
        let mut playback = open(&handle);
        playback.shutdown(Duration::from_millis(50)).await
    });
    drop(runtime);

    assert!(matches!(result, Err(AudioError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(1));
}
