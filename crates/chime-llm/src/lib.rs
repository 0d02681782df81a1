//! # chime-llm
//!
//! Text generation for the Chime relay: a streaming HTTP client
//! ([`CompletionClient`]) that implements [`chime_core::Generator`] over
//! Server-Sent Events, and a scripted `MockGenerator` for tests
//! (behind the `test-util` feature).

pub mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod sse;

pub use client::{CompletionClient, CompletionConfig};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockGenerator, MockResponse, MockStep};
