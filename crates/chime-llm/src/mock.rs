//! Scripted generator for tests, with gated responses and abandonment tracking.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use chime_core::{GenerateRequest, GenerationChunk, GenerationError, GenerationStream, Generator};

/// One step of a scripted generation stream.
#[derive(Clone, Debug)]
pub enum MockStep {
    /// Yield a text delta.
    Delta(String),
    /// Park until the gate is notified.
    Wait(Arc<Notify>),
    /// Yield a stream error and end.
    Fail(String),
    /// Yield the finish signal and end.
    Done,
}

/// Pre-programmed responses for deterministic tests without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Stream the steps in order.
    Script(Vec<MockStep>),
    /// Fail the `stream_generate` call itself.
    Reject(String),
}

impl MockResponse {
    /// Stream each chunk as a delta, then finish.
    pub fn chunks(chunks: &[&str]) -> Self {
        let mut steps: Vec<MockStep> = chunks
            .iter()
            .map(|c| MockStep::Delta((*c).to_string()))
            .collect();
        steps.push(MockStep::Done);
        Self::Script(steps)
    }

    /// Stream `before`, wait for `gate`, then stream `after` and finish.
    pub fn gated(before: &[&str], gate: Arc<Notify>, after: &[&str]) -> Self {
        let mut steps: Vec<MockStep> = before
            .iter()
            .map(|c| MockStep::Delta((*c).to_string()))
            .collect();
        steps.push(MockStep::Wait(gate));
        steps.extend(after.iter().map(|c| MockStep::Delta((*c).to_string())));
        steps.push(MockStep::Done);
        Self::Script(steps)
    }

    /// Stream `chunks`, then fail mid-stream.
    pub fn failing_after(chunks: &[&str], message: &str) -> Self {
        let mut steps: Vec<MockStep> = chunks
            .iter()
            .map(|c| MockStep::Delta((*c).to_string()))
            .collect();
        steps.push(MockStep::Fail(message.to_string()));
        Self::Script(steps)
    }
}

/// Generator that replays scripted responses in call order.
#[derive(Default)]
pub struct MockGenerator {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<GenerateRequest>>,
    abandoned: Arc<AtomicUsize>,
}

impl MockGenerator {
    /// Answers requests with `responses` in order.
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Queue another response.
    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Streams dropped by the consumer before they finished.
    pub fn abandoned_streams(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Counts a stream as abandoned if it is dropped before reaching its end.
struct FinishGuard {
    finished: bool,
    abandoned: Arc<AtomicUsize>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn stream_generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerationStream, GenerationError> {
        self.requests.lock().push(request.clone());

        let Some(response) = self.responses.lock().pop_front() else {
            return Err(GenerationError::Stream(format!(
                "MockGenerator: no response configured for call {}",
                self.call_count()
            )));
        };

        let steps = match response {
            MockResponse::Reject(message) => {
                return Err(GenerationError::Transport(message));
            }
            MockResponse::Script(steps) => steps,
        };

        let abandoned = self.abandoned.clone();
        let stream = async_stream::stream! {
            let mut guard = FinishGuard { finished: false, abandoned };
            for step in steps {
                match step {
                    MockStep::Delta(text) => yield Ok(GenerationChunk::Delta(text)),
                    MockStep::Wait(gate) => gate.notified().await,
                    MockStep::Fail(message) => {
                        guard.finished = true;
                        yield Err(GenerationError::Stream(message));
                        return;
                    }
                    MockStep::Done => {
                        guard.finished = true;
                        yield Ok(GenerationChunk::Done);
                        return;
                    }
                }
            }
            guard.finished = true;
        };
        Ok(Box::pin(stream))
    }
}
