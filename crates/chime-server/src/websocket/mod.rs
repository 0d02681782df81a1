//! `WebSocket` connection state, registry, session loops and inbound dispatch.

pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod session;

pub use connection::ClientConnection;
pub use dispatcher::{Dispatcher, Route, SerialLane, classify};
pub use registry::ConnectionRegistry;
pub use session::{CloseReason, SessionContext, SessionTiming, run_session};
