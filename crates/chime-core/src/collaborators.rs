//! Interfaces to the external services the relay depends on.
//!
//! The relay only ever talks to generation, synthesis and storage through
//! these traits. Concrete HTTP and `SQLite` implementations live in their
//! own crates; tests substitute scripted fakes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::{GenerationError, StorageError, SynthesisError};
use crate::ids::ConversationId;

// ─────────────────────────────────────────────────────────────────────────────
// Generation
// ─────────────────────────────────────────────────────────────────────────────

/// One streamed generation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Conversation the prompt belongs to.
    pub conversation_id: ConversationId,
    /// Who is asking (the connection id).
    pub actor_id: String,
    /// User utterance.
    pub prompt: String,
}

/// An item from a generation stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationChunk {
    /// Incremental text.
    Delta(String),
    /// The service finished the answer.
    Done,
}

/// Stream of generation chunks. Dropping it tells the producer to stop.
pub type GenerationStream =
    Pin<Box<dyn Stream<Item = Result<GenerationChunk, GenerationError>> + Send>>;

/// Streaming text generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating an answer for `request`.
    async fn stream_generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerationStream, GenerationError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis
// ─────────────────────────────────────────────────────────────────────────────

/// Encoded audio returned by a synthesizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedAudio {
    /// Encoded audio bytes (e.g. MP3).
    pub bytes: Vec<u8>,
    /// Playback length in milliseconds.
    pub duration_ms: u32,
}

/// Text-to-speech service.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into audio.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio, SynthesisError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Speaker of a history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human.
    User,
    /// The generated answer.
    Assistant,
    /// Server-authored text such as the greeting.
    System,
}

impl Role {
    /// Stored string value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A history entry to append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewHistoryEntry {
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Speaker.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Audio length, when audio was produced.
    pub duration_ms: Option<u32>,
    /// Time from request to finished answer.
    pub response_time_ms: Option<u64>,
}

impl NewHistoryEntry {
    /// Entry with no audio or timing metadata.
    pub fn new(conversation_id: ConversationId, role: Role, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role,
            content: content.into(),
            duration_ms: None,
            response_time_ms: None,
        }
    }
}

/// A stored history entry, as returned to clients in `history_data`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row id.
    pub id: i64,
    /// Owning conversation.
    pub session_id: ConversationId,
    /// Speaker.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Audio length in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u32>,
    /// Answer latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Persistent conversation storage.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create the conversation session if it does not exist yet.
    async fn create_session(&self, id: &ConversationId) -> Result<(), StorageError>;

    /// Record activity on a conversation session.
    async fn touch_session(&self, id: &ConversationId) -> Result<(), StorageError>;

    /// Append one history entry.
    async fn append_history(&self, entry: NewHistoryEntry) -> Result<(), StorageError>;

    /// All entries of a conversation in creation order.
    async fn fetch_history(&self, id: &ConversationId) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Delete entries older than `days`; returns how many were removed.
    async fn prune_history_older_than(&self, days: u32) -> Result<usize, StorageError>;
}
