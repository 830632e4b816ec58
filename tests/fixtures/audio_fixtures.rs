//! Audio Test Fixtures
//!
//! Programmatically generated PCM16 mono audio at the session rate (24kHz).
//! Generated audio keeps tests reproducible and free of file dependencies.

use std::f32::consts::PI;

/// Sample rate of session audio.
pub const SAMPLE_RATE: u32 = 24000;

/// Duration constants (in samples at 24kHz)
pub const MS_20: usize = 480;
pub const MS_50: usize = 1200;
pub const MS_100: usize = 2400;

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Generate a sine wave tone
pub fn generate_sine_wave(duration_samples: usize, frequency: f32, amplitude: f32) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / SAMPLE_RATE as f32;

    (0..duration_samples)
        .map(|i| {
            let sample = (angular_freq * i as f32).sin() * max_amplitude;
            sample as i16
        })
        .collect()
}

/// Generate a 440Hz tone at half amplitude
pub fn generate_a440_tone(duration_samples: usize) -> Vec<i16> {
    generate_sine_wave(duration_samples, 440.0, 0.5)
}

/// Strictly increasing samples starting at `start`, wrapping at `i16::MAX`.
///
/// Every sample is distinct within 32767 samples, which makes ordering and
/// loss visible in assertions.
pub fn generate_ramp(start: usize, duration_samples: usize) -> Vec<i16> {
    (start..start + duration_samples)
        .map(|i| (i % i16::MAX as usize) as i16 + 1)
        .collect()
}

/// Convert samples to little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Convert little-endian bytes to samples
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Calculate RMS of samples
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}
