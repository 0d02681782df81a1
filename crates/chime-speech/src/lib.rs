//! # chime-speech
//!
//! Text-to-speech for the Chime relay: [`SpeechClient`] calls a JSON
//! synthesis API and decodes its base64 audio. `MockSynthesizer` is the
//! test double, behind the `test-util` feature.

pub mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{SpeechClient, SpeechConfig};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockSpeech, MockSynthesizer};
