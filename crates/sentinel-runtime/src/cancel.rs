//! Run-scoped cancellation and deadline tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The single cancellation source shared by a run and every `ExecCtx`
/// derived from it. Cloning a `CancellationToken` shares the same
/// underlying flag; this wrapper exists only to pair it with the run's
/// deadline and spawn the timer that fires it.
///
/// Distinguishes cancellation requested by the caller or a deadline
/// ([`Self::cancel`]) from cancellation used only to stop dispatching new
/// nodes after a fail-fast failure ([`Self::cancel_for_failure`]): both
/// stop the run the same way, but only the former forces the run's
/// aggregate status to `Cancelled` rather than `Failed`.
#[derive(Debug, Clone)]
pub struct RunCancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
    externally_cancelled: Arc<AtomicBool>,
}

impl RunCancellation {
    /// Build a fresh, un-cancelled cancellation source with an optional
    /// wall-clock timeout.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: timeout.map(|d| Instant::now() + d),
            externally_cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying token, clonable into every `ExecCtx`.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The absolute deadline, if this run has a timeout.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Request cancellation on behalf of the caller (`Engine::stop`) or a
    /// deadline. Idempotent.
    pub fn cancel(&self) {
        self.externally_cancelled.store(true, Ordering::Release);
        self.token.cancel();
    }

    /// Stop further dispatch after a fail-fast failure, without marking
    /// the run as externally cancelled.
    pub fn cancel_for_failure(&self) {
        self.token.cancel();
    }

    /// True if cancellation has been requested, for any reason.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True only if [`Self::cancel`] (caller or deadline) was the cause,
    /// as opposed to [`Self::cancel_for_failure`].
    #[must_use]
    pub fn was_externally_cancelled(&self) -> bool {
        self.externally_cancelled.load(Ordering::Acquire)
    }

    /// Spawn a task that cancels the token once the deadline elapses.
    /// A no-op if this run has no deadline.
    pub fn spawn_deadline_watcher(&self) {
        let Some(deadline) = self.deadline else {
            return;
        };
        let token = self.token.clone();
        let externally_cancelled = Arc::clone(&self.externally_cancelled);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;
            externally_cancelled.store(true, Ordering::Release);
            token.cancel();
        });
    }
}
