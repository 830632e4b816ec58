//! Test Fixtures Module
//!
//! Shared fixtures for the integration tests:
//! - Audio fixtures (programmatically generated)
//! - Scripted input and output devices
//! - Server event builders

// Each test binary uses a different subset of the fixtures
#![allow(dead_code)]

pub mod audio_fixtures;
pub mod devices;
pub mod events;

pub use audio_fixtures::*;
pub use devices::*;
pub use events::*;
