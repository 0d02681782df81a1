//! Streaming relay controller.
//!
//! Runs one user turn for a connection: forwards generation deltas as
//! `ai_text_chunk` frames, closes the text with `ai_text_complete`, then
//! synthesizes the transcript and sends `audio_data`.
//!
//! Cancellation is cooperative. The turn observes its token while waiting
//! for the collaborator, before each emitted chunk, after the finish signal
//! and around synthesis. A cancelled turn emits nothing further and drops
//! the generation stream, which tells the producer to stop.

use std::sync::Arc;
use std::time::Instant;

use chime_core::{
    ConversationId, Envelope, ErrorCode, GenerateRequest, GenerationChunk, Generator,
    HistoryStore, NewHistoryEntry, Role, Synthesizer,
};
use futures::StreamExt;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::TurnError;
use crate::metrics::{ERROR_FRAMES_TOTAL, TURN_DURATION_SECONDS, TURNS_TOTAL};
use crate::websocket::connection::ClientConnection;

/// Where a turn is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    /// No turn running.
    Idle,
    /// Waiting for the generation collaborator to start streaming.
    Requesting,
    /// Relaying deltas.
    Streaming,
    /// Waiting for audio.
    Synthesizing,
    /// Stopped by the client.
    Cancelled,
}

impl TurnPhase {
    /// Log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::Synthesizing => "synthesizing",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A user utterance to answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserTurn {
    /// Conversation the utterance belongs to.
    pub conversation_id: ConversationId,
    /// Who sent it (the connection id).
    pub actor_id: String,
    /// Raw utterance text.
    pub text: String,
}

/// How a turn ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Text and audio were delivered.
    Delivered {
        /// Full answer text.
        transcript: String,
        /// Audio length in milliseconds.
        audio_duration_ms: u32,
    },
    /// Text was delivered without audio.
    TextOnly {
        /// Full answer text.
        transcript: String,
    },
    /// The client stopped the turn.
    Cancelled {
        /// Phase the turn was in when it noticed the stop.
        during: TurnPhase,
    },
}

impl TurnOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::TextOnly { .. } => "text_only",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Orchestrates user turns over the generation, synthesis and storage
/// collaborators.
pub struct TurnRelay {
    generator: Arc<dyn Generator>,
    synthesizer: Arc<dyn Synthesizer>,
    store: Arc<dyn HistoryStore>,
}

impl TurnRelay {
    /// Relay over the given generation, synthesis and storage collaborators.
    pub fn new(
        generator: Arc<dyn Generator>,
        synthesizer: Arc<dyn Synthesizer>,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            store,
        }
    }

    /// Synthesis collaborator, shared with the welcome handler.
    pub fn synthesizer(&self) -> &Arc<dyn Synthesizer> {
        &self.synthesizer
    }

    /// Storage collaborator, shared with the welcome and history handlers.
    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Run a turn and report any failure to the client as an `error` frame.
    pub async fn run_turn(&self, conn: &ClientConnection, cancel: CancellationToken, turn: UserTurn) {
        let started = Instant::now();
        let session_id = turn.conversation_id.to_string();

        let label = match self.process_user_turn(conn, &cancel, turn).await {
            Ok(outcome) => {
                let phase = match &outcome {
                    TurnOutcome::Cancelled { during } => {
                        info!(conn_id = %conn.id, during = during.as_str(), "turn cancelled");
                        TurnPhase::Cancelled
                    }
                    _ => TurnPhase::Idle,
                };
                conn.set_turn_phase(phase);
                outcome.label()
            }
            Err(err) => {
                conn.set_turn_phase(TurnPhase::Idle);
                match err.code() {
                    Some(code) => {
                        warn!(conn_id = %conn.id, error = %err, code = code.as_str(), "turn failed");
                        send_error(conn, &session_id, code).await;
                    }
                    None => debug!(conn_id = %conn.id, error = %err, "turn abandoned"),
                }
                "failed"
            }
        };

        counter!(TURNS_TOTAL, "outcome" => label).increment(1);
        histogram!(TURN_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    }

    /// Answer one user utterance.
    ///
    /// Emits `ai_text_chunk`* then `ai_text_complete`, followed by either
    /// `audio_data` or `error{TTS_ERROR}`. A stop observed at any checkpoint
    /// ends the turn with [`TurnOutcome::Cancelled`] and no further frames.
    #[instrument(skip_all, fields(conn_id = %conn.id, session_id = %turn.conversation_id))]
    pub async fn process_user_turn(
        &self,
        conn: &ClientConnection,
        cancel: &CancellationToken,
        turn: UserTurn,
    ) -> Result<TurnOutcome, TurnError> {
        let prompt = turn.text.trim();
        if prompt.is_empty() {
            return Err(TurnError::InvalidInput("empty message"));
        }
        if turn.conversation_id.is_empty() {
            return Err(TurnError::InvalidInput("missing conversation id"));
        }
        let conversation = &turn.conversation_id;
        let started = Instant::now();

        if let Err(e) = self.store.touch_session(conversation).await {
            warn!(error = %e, "failed to touch conversation session");
        }
        self.persist(NewHistoryEntry::new(conversation.clone(), Role::User, prompt))
            .await;

        // Requesting
        conn.set_turn_phase(TurnPhase::Requesting);
        if cancel.is_cancelled() {
            return Ok(cancelled(TurnPhase::Requesting));
        }
        let request = GenerateRequest {
            conversation_id: conversation.clone(),
            actor_id: turn.actor_id.clone(),
            prompt: prompt.to_owned(),
        };
        let started_stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(cancelled(TurnPhase::Requesting)),
            result = self.generator.stream_generate(&request) => result,
        };
        let mut stream = match started_stream {
            Ok(stream) => stream,
            Err(_) if cancel.is_cancelled() => return Ok(cancelled(TurnPhase::Requesting)),
            Err(e) => return Err(e.into()),
        };

        // Streaming
        conn.set_turn_phase(TurnPhase::Streaming);
        let mut transcript = String::new();
        let mut chunks = 0_usize;
        loop {
            // biased: a pending stop wins over a ready chunk
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(cancelled(TurnPhase::Streaming)),
                item = stream.next() => item,
            };
            match item {
                Some(Ok(GenerationChunk::Delta(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    transcript.push_str(&delta);
                    chunks += 1;
                    conn.enqueue(Envelope::text_chunk(conversation, delta))
                        .await?;
                }
                Some(Ok(GenerationChunk::Done)) | None => break,
                Some(Err(_)) if cancel.is_cancelled() => {
                    return Ok(cancelled(TurnPhase::Streaming));
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
        drop(stream);

        if cancel.is_cancelled() {
            return Ok(cancelled(TurnPhase::Streaming));
        }
        conn.enqueue(Envelope::text_complete(conversation, transcript.clone()))
            .await?;
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(chunks, response_time_ms, "answer streamed");

        let mut entry = NewHistoryEntry::new(conversation.clone(), Role::Assistant, &*transcript);
        entry.response_time_ms = Some(response_time_ms);
        self.persist(entry).await;

        if transcript.trim().is_empty() {
            debug!("blank answer, skipping synthesis");
            return Ok(TurnOutcome::TextOnly { transcript });
        }

        // Synthesizing
        conn.set_turn_phase(TurnPhase::Synthesizing);
        if cancel.is_cancelled() {
            return Ok(cancelled(TurnPhase::Synthesizing));
        }
        let synthesized = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(cancelled(TurnPhase::Synthesizing)),
            result = self.synthesizer.synthesize(&transcript) => result,
        };
        if cancel.is_cancelled() {
            return Ok(cancelled(TurnPhase::Synthesizing));
        }

        match synthesized {
            Ok(audio) => {
                conn.enqueue(Envelope::audio(conversation, &audio)).await?;
                Ok(TurnOutcome::Delivered {
                    transcript,
                    audio_duration_ms: audio.duration_ms,
                })
            }
            Err(e) => {
                warn!(error = %e, "speech synthesis failed, delivering text only");
                counter!(ERROR_FRAMES_TOTAL, "code" => ErrorCode::TtsError.as_str()).increment(1);
                conn.enqueue(Envelope::error(conversation.as_str(), ErrorCode::TtsError))
                    .await?;
                Ok(TurnOutcome::TextOnly { transcript })
            }
        }
    }

    async fn persist(&self, entry: NewHistoryEntry) {
        let role = entry.role;
        if let Err(e) = self.store.append_history(entry).await {
            warn!(role = role.as_str(), error = %e, "failed to persist history entry");
        }
    }
}

fn cancelled(during: TurnPhase) -> TurnOutcome {
    TurnOutcome::Cancelled { during }
}

/// Enqueue an `error` frame, logging instead of failing if the client is gone.
pub(crate) async fn send_error(conn: &ClientConnection, session_id: &str, code: ErrorCode) {
    counter!(ERROR_FRAMES_TOTAL, "code" => code.as_str()).increment(1);
    if conn.enqueue(Envelope::error(session_id, code)).await.is_err() {
        debug!(conn_id = %conn.id, code = code.as_str(), "error frame dropped, connection closed");
    }
}
