//! Error types shared across the relay.
//!
//! [`ErrorCode`] is the only thing a client ever sees about a failure; the
//! richer error enums below stay server-side and are logged.

use thiserror::Error;

/// Stable, user-visible error codes carried in `error` frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Empty text or missing conversation id.
    InvalidInput,
    /// The generation service failed.
    AiError,
    /// Speech synthesis failed; text was already delivered.
    TtsError,
    /// History could not be read.
    HistoryError,
    /// The welcome greeting could not be produced.
    WelcomeError,
}

impl ErrorCode {
    /// Wire value of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::AiError => "AI_ERROR",
            Self::TtsError => "TTS_ERROR",
            Self::HistoryError => "HISTORY_ERROR",
            Self::WelcomeError => "WELCOME_ERROR",
        }
    }

    /// Human-readable message shown alongside the code.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidInput => "Conversation id or message content is empty",
            Self::AiError => "The assistant is unavailable right now, please try again later",
            Self::TtsError => "Speech synthesis failed, showing text only",
            Self::HistoryError => "Failed to load conversation history",
            Self::WelcomeError => "Failed to prepare the welcome message",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame could not be decoded or encoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound frame was not a valid envelope.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Outbound envelope could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failure reported by a generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Network or HTTP-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered with an error.
    #[error("API error ({code}): {message}")]
    Api {
        /// Service-specific code or HTTP status.
        code: String,
        /// Service-provided message.
        message: String,
    },
    /// A streamed event could not be understood.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Failure reported by a synthesis collaborator.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Nothing to synthesize.
    #[error("synthesis text is empty")]
    EmptyText,
    /// Network or HTTP-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered with an error.
    #[error("API error ({code}): {message}")]
    Api {
        /// Service-specific code or HTTP status.
        code: String,
        /// Service-provided message.
        message: String,
    },
    /// The returned audio payload was unusable.
    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),
}

/// Failure reported by a storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store rejected the operation.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// The store could not be reached (e.g. worker task panicked).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
