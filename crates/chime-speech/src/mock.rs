//! Scripted synthesizer for tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use chime_core::{SynthesisError, SynthesizedAudio, Synthesizer};

/// A scripted synthesis outcome.
#[derive(Clone, Debug)]
pub enum MockSpeech {
    /// Succeed with audio derived from the text.
    Speak,
    /// Fail with a transport error.
    Fail(String),
    /// Wait for the gate, then resolve the inner outcome.
    Gated(Arc<Notify>, Box<MockSpeech>),
}

/// Synthesizer that records calls and replays scripted outcomes.
///
/// Once the script runs out every call succeeds.
#[derive(Default)]
pub struct MockSynthesizer {
    script: Mutex<VecDeque<MockSpeech>>,
    calls: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    /// Always succeeds.
    pub fn speaking() -> Self {
        Self::default()
    }

    /// Plays `script` in order, then succeeds.
    pub fn new(script: Vec<MockSpeech>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Texts passed to `synthesize`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Audio the mock produces for `text`.
    pub fn audio_for(text: &str) -> SynthesizedAudio {
        SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            duration_ms: u32::try_from(text.chars().count() * 100).unwrap_or(u32::MAX),
        }
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError> {
        self.calls.lock().push(text.to_string());
        let mut step = self.script.lock().pop_front().unwrap_or(MockSpeech::Speak);
        loop {
            match step {
                MockSpeech::Speak => return Ok(Self::audio_for(text)),
                MockSpeech::Fail(message) => return Err(SynthesisError::Transport(message)),
                MockSpeech::Gated(gate, inner) => {
                    gate.notified().await;
                    step = *inner;
                }
            }
        }
    }
}
