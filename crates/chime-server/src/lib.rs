//! # chime-server
//!
//! Axum HTTP + `WebSocket` relay between voice-chat clients and the
//! generation and synthesis services.
//!
//! - [`websocket`]: connection registry, per-connection session loops, inbound dispatch
//! - [`relay`]: the streaming user-turn controller with cooperative cancellation
//! - [`server`]: router, `/health`, `/metrics`, admission limit, listener
//! - Graceful shutdown via a shared `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use config::ServerConfig;
pub use errors::{RegistryError, ServerError, TurnError};
pub use relay::{TurnOutcome, TurnPhase, TurnRelay, UserTurn};
pub use server::{ChimeServer, Collaborators};
pub use shutdown::{DrainOutcome, ShutdownCoordinator};
