//! # chime-core
//!
//! Foundation types for the Chime voice-chat relay:
//!
//! - [`envelope`]: the JSON frame exchanged with clients
//! - [`ids`]: branded connection and conversation identifiers
//! - [`errors`]: user-visible [`ErrorCode`]s and collaborator error enums
//! - [`collaborators`]: generation, synthesis and storage traits
//! - [`logging`]: `tracing` subscriber setup

pub mod collaborators;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use collaborators::{
    GenerateRequest, GenerationChunk, GenerationStream, Generator, HistoryEntry, HistoryStore,
    NewHistoryEntry, Role, SynthesizedAudio, Synthesizer,
};
pub use envelope::{Envelope, MessageKind};
pub use errors::{ErrorCode, GenerationError, ProtocolError, StorageError, SynthesisError};
pub use ids::{ConnectionId, ConversationId};
