//! Shutdown signalling for the listener, sessions and background tasks.
//!
//! Everything long-lived holds a clone of one `CancellationToken`. Sessions
//! close their sockets when it fires, the listener stops accepting, and the
//! binary then drains its own tasks within a bounded window.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drain window used when the caller does not pick one.
const DEFAULT_DRAIN: Duration = Duration::from_secs(10);

/// What happened to the tasks handed to [`ShutdownCoordinator::graceful_shutdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Tasks that ended inside the window.
    pub finished: usize,
    /// Tasks still running when the window closed.
    pub aborted: usize,
}

/// Owns the server-wide shutdown token.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// A coordinator whose token has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that fires when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutting down. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then give `handles` up to `drain` to finish.
    /// Stragglers are aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        drain: Option<Duration>,
    ) -> DrainOutcome {
        let drain = drain.unwrap_or(DEFAULT_DRAIN);
        self.shutdown();
        info!(tasks = handles.len(), ?drain, "draining background tasks");

        let deadline = tokio::time::Instant::now() + drain;
        let mut outcome = DrainOutcome::default();
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_ok() {
                outcome.finished += 1;
            } else {
                handle.abort();
                outcome.aborted += 1;
            }
        }

        if outcome.aborted > 0 {
            warn!(aborted = outcome.aborted, ?drain, "drain window elapsed, aborted remaining tasks");
        }
        outcome
    }
}
