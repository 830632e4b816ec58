//! Turn controller integration tests.
//!
//! Check which client events the recording toggle produces in each turn mode.

mod fixtures;

use fixtures::*;
use rtvoice::core::realtime::{DuplexChannel, TurnController, TurnMode};
use tokio::sync::watch;

/// Manual mode: ending a recording commits the input buffer and requests a
/// response, in that order and only once.
#[tokio::test]
async fn test_manual_mode_ends_turn_on_stop() {
    let (channel, mut remote) = DuplexChannel::pair(8);
    let (_mode_tx, mode_rx) = watch::channel(TurnMode::Manual);
    let (controller, recording) = TurnController::new(mode_rx, channel.sender());

    assert!(!recording.is_on());
    assert!(controller.toggle().await.unwrap());
    assert!(recording.is_on());
    assert!(remote.drain().is_empty());

    assert!(!controller.toggle().await.unwrap());
    assert!(!recording.is_on());
    assert_eq!(
        event_types(&remote.drain()),
        vec!["input_audio_buffer.commit", "response.create"]
    );

    // Stopping again is a no-op.
    assert!(!controller.set_recording(false).await.unwrap());
    assert!(remote.drain().is_empty());
}

/// Server-VAD mode: the toggle only gates capture.
#[tokio::test]
async fn test_vad_mode_sends_nothing() {
    let (channel, mut remote) = DuplexChannel::pair(8);
    let (_mode_tx, mode_rx) = watch::channel(TurnMode::ServerVad);
    let (controller, recording) = TurnController::new(mode_rx, channel.sender());

    for _ in 0..4 {
        controller.toggle().await.unwrap();
    }
    assert!(!recording.is_on());
    assert!(remote.drain().is_empty());
}

/// The mode negotiated by the remote side wins over the one requested.
#[tokio::test]
async fn test_negotiated_mode_takes_effect() {
    let (channel, mut remote) = DuplexChannel::pair(8);
    let (mode_tx, mode_rx) = watch::channel(TurnMode::ServerVad);
    let (controller, _recording) = TurnController::new(mode_rx, channel.sender());

    controller.set_recording(true).await.unwrap();
    mode_tx.send_replace(TurnMode::Manual);
    assert_eq!(controller.turn_mode(), TurnMode::Manual);

    controller.set_recording(false).await.unwrap();
    assert_eq!(
        event_types(&remote.drain()),
        vec!["input_audio_buffer.commit", "response.create"]
    );
}

/// A lost connection surfaces as an error from the toggle.
#[tokio::test]
async fn test_stop_fails_when_channel_closed() {
    let (channel, remote) = DuplexChannel::pair(8);
    let (_mode_tx, mode_rx) = watch::channel(TurnMode::Manual);
    let (controller, _recording) = TurnController::new(mode_rx, channel.sender());
    drop(remote);

    controller.set_recording(true).await.unwrap();
    assert!(controller.set_recording(false).await.is_err());
}
