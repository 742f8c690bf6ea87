use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// -----------------------------------------------------------------------------
// ----- TimerKind -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    PairingPoll,
    PairingCountdown,
    AutoRefresh,
    StaleCheck,
    ChangeFeed,
}

// -----------------------------------------------------------------------------
// ----- TimerLease ------------------------------------------------------------

/// Ownership of one background timer task.
///
/// `release` is idempotent and also runs on drop, so every exit path
/// (completion, cancellation, teardown) can call it without bookkeeping.
/// The task observes release through its token at its next wait point.
#[derive(Debug)]
pub struct TimerLease {
    kind: TimerKind,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

// -----------------------------------------------------------------------------
// ----- TimerLease: Static ----------------------------------------------------

impl TimerLease {
    pub fn spawn<F, Fut>(kind: TimerKind, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(body(token.clone()));

        Self {
            kind,
            token,
            task: Some(task),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- TimerLease: Public ----------------------------------------------------

impl TimerLease {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn release(&self) {
        if self.token.is_cancelled() {
            return;
        }

        debug!("releasing {:?} timer", self.kind);
        self.token.cancel();
    }

    /// Release and wait for the task to wind down.
    pub async fn join(mut self) {
        self.release();

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TimerLease {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
