//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.
//!
//! Each session runs two loops. The inbound loop reads frames, enforces the
//! read-idle deadline and hands envelopes to the [`Dispatcher`]. The
//! outbound loop drains the connection's queue onto the socket with a
//! per-write deadline and probes liveness with pings. Whichever loop stops
//! first tears the session down; teardown runs exactly once.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use chime_core::{ConnectionId, Envelope};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::dispatcher::{Dispatcher, SerialLane};
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::metrics::{
    PROTOCOL_ERRORS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Liveness deadlines for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionTiming {
    /// Inbound silence that closes the connection.
    pub read_idle: Duration,
    /// Deadline for a single outbound write.
    pub write_timeout: Duration,
    /// Outbound silence before a ping is sent.
    pub ping_interval: Duration,
}

impl From<&ServerConfig> for SessionTiming {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_idle: config.read_idle_timeout(),
            write_timeout: config.write_timeout(),
            ping_interval: config.ping_interval(),
        }
    }
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the socket.
    PeerClosed,
    /// No inbound frame within the read-idle deadline.
    ReadIdle,
    /// Reading from the socket failed.
    ReadFailed,
    /// Writing to the socket failed.
    WriteFailed,
    /// A write missed its deadline.
    WriteTimeout,
    /// The server is shutting down.
    Shutdown,
    /// The connection could not be registered.
    Rejected,
}

impl CloseReason {
    /// Metric and log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadIdle => "read_idle",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
            Self::WriteTimeout => "write_timeout",
            Self::Shutdown => "shutdown",
            Self::Rejected => "rejected",
        }
    }
}

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Live connection table.
    pub registry: Arc<ConnectionRegistry>,
    /// Inbound router.
    pub dispatcher: Dispatcher,
    /// Liveness deadlines.
    pub timing: SessionTiming,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

/// One-shot teardown shared by both loops.
struct SessionGuard {
    conn: Arc<ClientConnection>,
    registry: Arc<ConnectionRegistry>,
    reason: Mutex<Option<CloseReason>>,
}

impl SessionGuard {
    fn new(conn: Arc<ClientConnection>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            conn,
            registry,
            reason: Mutex::new(None),
        }
    }

    /// Unregister, close the queue and cancel in-flight work.
    /// Returns `false` if the session was already torn down.
    fn teardown(&self, reason: CloseReason) -> bool {
        if !self.conn.begin_teardown() {
            return false;
        }
        *self.reason.lock() = Some(reason);
        let _ = self.registry.remove(&self.conn.id);
        self.conn.request_stop();
        self.conn.signal_closed();

        info!(
            conn_id = %self.conn.id,
            reason = reason.as_str(),
            dropped = self.conn.drop_count(),
            "client disconnected"
        );
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(self.conn.age().as_secs_f64());
        true
    }

    fn reason(&self) -> Option<CloseReason> {
        *self.reason.lock()
    }
}

/// Run a WebSocket session for a connected client until it closes.
///
/// `sink` and `stream` are the two halves of the socket.
#[instrument(skip_all, fields(conn_id))]
pub async fn run_session<S, R, E>(sink: S, stream: R, ctx: SessionContext) -> CloseReason
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display,
{
    let id = ConnectionId::new();
    let _ = tracing::Span::current().record("conn_id", tracing::field::display(&id));

    let (tx, rx) = mpsc::channel::<Envelope>(ctx.queue_capacity);
    let conn = Arc::new(ClientConnection::new(id, tx));
    if let Err(e) = ctx.registry.add(conn.clone()) {
        warn!(error = %e, "failed to register connection");
        return CloseReason::Rejected;
    }
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let guard = Arc::new(SessionGuard::new(conn, ctx.registry.clone()));
    let mut outbound = tokio::spawn(run_outbound(sink, rx, guard.clone(), ctx.timing));

    let reason = run_inbound(stream, &guard, &ctx).await;
    let _ = guard.teardown(reason);

    // Give the outbound loop one write deadline to flush and send Close.
    if tokio::time::timeout(ctx.timing.write_timeout, &mut outbound)
        .await
        .is_err()
    {
        debug!("outbound loop did not finish, aborting");
        outbound.abort();
    }

    guard.reason().unwrap_or(reason)
}

async fn run_inbound<R, E>(mut stream: R, guard: &SessionGuard, ctx: &SessionContext) -> CloseReason
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let conn = &guard.conn;
    let mut lane = SerialLane::new();

    loop {
        let next = tokio::select! {
            biased;
            () = conn.closed() => return guard.reason().unwrap_or(CloseReason::WriteFailed),
            () = ctx.shutdown.cancelled() => return CloseReason::Shutdown,
            next = tokio::time::timeout(ctx.timing.read_idle, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                info!(idle = ?ctx.timing.read_idle, "read idle timeout");
                return CloseReason::ReadIdle;
            }
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                return CloseReason::ReadFailed;
            }
            Ok(Some(Ok(msg))) => msg,
        };
        conn.mark_seen();

        // Clients may send envelopes as Text or UTF-8 Binary frames
        let decoded = match &msg {
            Message::Text(text) => Envelope::decode(text.as_str()),
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(data) {
                    Envelope::decode(text)
                } else {
                    warn!(len = data.len(), "skipping non-UTF-8 binary frame");
                    counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
                    continue;
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                return CloseReason::PeerClosed;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match decoded {
            Ok(envelope) => ctx.dispatcher.dispatch(conn, &mut lane, envelope).await,
            Err(e) => {
                warn!(error = %e, "skipping malformed frame");
                counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
            }
        }
    }
}

async fn run_outbound<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Envelope>,
    guard: Arc<SessionGuard>,
    timing: SessionTiming,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = tokio::time::interval(timing.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    let failure = loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(envelope) = msg else {
                    // Queue closed by teardown and fully drained.
                    let _ = write(&mut sink, Message::Close(None), timing.write_timeout).await;
                    break None;
                };
                let json = match envelope.encode() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(kind = %envelope.kind, error = %e, "failed to encode frame");
                        continue;
                    }
                };
                let frame = Message::Text(json.into());
                if let Err(reason) = write(&mut sink, frame, timing.write_timeout).await {
                    break Some(reason);
                }
                ping.reset();
            }
            _ = ping.tick() => {
                let probe = Message::Ping(Bytes::new());
                if let Err(reason) = write(&mut sink, probe, timing.write_timeout).await {
                    break Some(reason);
                }
            }
        }
    };

    if let Some(reason) = failure {
        let _ = guard.teardown(reason);
    }
}

async fn write<S>(sink: &mut S, msg: Message, deadline: Duration) -> Result<(), CloseReason>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(deadline, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "write failed");
            Err(CloseReason::WriteFailed)
        }
        Err(_) => {
            warn!(?deadline, "write deadline exceeded");
            Err(CloseReason::WriteTimeout)
        }
    }
}
