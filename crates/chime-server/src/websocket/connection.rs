//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chime_core::{ConnectionId, ConversationId, Envelope};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::errors::{EnqueueError, QueueClosed};
use crate::relay::TurnPhase;

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Conversation bound by `get_welcome` or `user_message`.
    conversation_id: Mutex<Option<ConversationId>>,
    /// Producer side of the outbound queue; `None` once closed.
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    /// Stop token for turns dispatched since the last `stop`.
    stop_token: Mutex<CancellationToken>,
    /// Phase of the current (or last) user turn.
    phase: Mutex<TurnPhase>,
    /// Cancelled when the connection is torn down.
    closed: CancellationToken,
    /// One-shot teardown guard.
    tearing_down: AtomicBool,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last inbound frame arrived.
    last_seen: Mutex<Instant>,
    /// Out-of-band frames that timed out or hit a closed queue.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection feeding `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Envelope>) -> Self {
        let now = Instant::now();
        Self {
            id,
            conversation_id: Mutex::new(None),
            tx: Mutex::new(Some(tx)),
            stop_token: Mutex::new(CancellationToken::new()),
            phase: Mutex::new(TurnPhase::Idle),
            closed: CancellationToken::new(),
            tearing_down: AtomicBool::new(false),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Bind this connection to a conversation.
    pub fn bind_conversation(&self, id: ConversationId) {
        *self.conversation_id.lock() = Some(id);
    }

    /// The currently bound conversation.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id.lock().clone()
    }

    /// Enqueue a frame, waiting while the queue is full.
    ///
    /// A producer parked on a full queue is released with [`QueueClosed`]
    /// once the connection is torn down.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), QueueClosed> {
        let tx = self.sender().ok_or(QueueClosed)?;
        tokio::select! {
            biased;
            result = tx.send(envelope) => result.map_err(|_| QueueClosed),
            () = self.closed() => Err(QueueClosed),
        }
    }

    /// Enqueue a frame, giving up after `timeout`.
    pub async fn enqueue_timeout(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<(), EnqueueError> {
        let Some(tx) = self.sender() else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            return Err(EnqueueError::Closed);
        };
        tx.send_timeout(envelope, timeout).await.map_err(|e| {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            match e {
                SendTimeoutError::Timeout(_) => EnqueueError::Timeout,
                SendTimeoutError::Closed(_) => EnqueueError::Closed,
            }
        })
    }

    fn sender(&self) -> Option<mpsc::Sender<Envelope>> {
        self.tx.lock().clone()
    }

    /// Close the outbound queue. Returns `true` only for the call that closed it.
    ///
    /// Frames already queued are still delivered; later enqueues fail.
    pub fn close_queue(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    /// Whether the outbound queue has been closed.
    pub fn is_queue_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Token for a turn starting now.
    ///
    /// The token is cancelled by the next [`request_stop`](Self::request_stop);
    /// earlier stops never affect it.
    pub fn begin_turn(&self) -> CancellationToken {
        let mut token = self.stop_token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    /// Cancel every turn dispatched so far.
    pub fn request_stop(&self) {
        let previous = std::mem::take(&mut *self.stop_token.lock());
        previous.cancel();
    }

    /// Phase of the current (or last) user turn.
    pub fn turn_phase(&self) -> TurnPhase {
        *self.phase.lock()
    }

    pub(crate) fn set_turn_phase(&self, phase: TurnPhase) {
        *self.phase.lock() = phase;
    }

    /// Claim the right to tear this connection down. `true` exactly once.
    pub fn begin_teardown(&self) -> bool {
        !self.tearing_down.swap(true, Ordering::AcqRel)
    }

    /// Wake everything waiting on [`closed`](Self::closed).
    pub fn signal_closed(&self) {
        self.closed.cancel();
    }

    /// Resolves once the connection has been torn down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Whether teardown has completed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Record inbound activity.
    pub fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame (or connection establishment).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Total out-of-band frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
