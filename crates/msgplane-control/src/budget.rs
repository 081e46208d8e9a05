//! Time budgets for the blocking steps of a pass.
//!
//! A step that waits on the outside world (successor readiness, drain
//! progress) polls a probe until it answers, the budget runs out, or a newer
//! trigger for the same space supersedes the pass. A budget covers a whole
//! step, not one probe.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Result of polling under a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe answered.
    Ready(T),
    /// The budget ran out first.
    TimedOut,
    /// A newer trigger arrived first.
    Superseded,
}

/// Watches the trigger generation of a space.
///
/// A pass is superseded once the generation differs from the one it
/// started with.
#[derive(Debug, Clone)]
pub struct Supersede {
    rx: Option<watch::Receiver<u64>>,
    start: u64,
}

impl Supersede {
    /// Start watching from the current generation.
    #[must_use]
    pub fn new(rx: watch::Receiver<u64>) -> Self {
        let start = *rx.borrow();
        Self {
            rx: Some(rx),
            start,
        }
    }

    /// A pass that is never superseded.
    #[must_use]
    pub const fn never() -> Self {
        Self { rx: None, start: 0 }
    }

    /// Returns true if a newer trigger arrived.
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow() != self.start)
    }

    /// Resolve once a newer trigger arrives.
    ///
    /// Pending forever if the generation can no longer change.
    pub async fn changed(&mut self) {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return std::future::pending().await;
            };
            if *rx.borrow_and_update() != self.start {
                return;
            }
            if rx.changed().await.is_err() {
                self.rx = None;
            }
        }
    }
}

/// A deadline shared by every probe of one step.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutBudget {
    deadline: Instant,
    interval: Duration,
}

impl TimeoutBudget {
    /// Start a budget of `budget`, probing every `interval`.
    #[must_use]
    pub fn new(budget: Duration, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            deadline: now
                .checked_add(budget)
                .unwrap_or_else(|| now + FAR_FUTURE),
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Time left.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Poll `probe` until it returns `Some`.
    ///
    /// The probe runs at least once unless the pass is already superseded,
    /// so a zero budget means exactly one probe.
    pub async fn poll_until<T, F, Fut>(&self, supersede: &mut Supersede, mut probe: F) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        loop {
            if supersede.is_superseded() {
                return PollOutcome::Superseded;
            }
            if let Some(value) = probe().await {
                return PollOutcome::Ready(value);
            }
            let remaining = self.remaining();
            if remaining.is_zero() {
                return PollOutcome::TimedOut;
            }
            tokio::select! {
                () = tokio::time::sleep(remaining.min(self.interval)) => {}
                () = supersede.changed() => return PollOutcome::Superseded,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn zero_budget_probes_once() {
        let calls = &AtomicU32::new(0);
        let budget = TimeoutBudget::new(Duration::ZERO, Duration::from_millis(10));
        let mut supersede = Supersede::never();

        let outcome = budget
            .poll_until(&mut supersede, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                None::<()>
            })
            .await;

        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_ready() {
        let calls = &AtomicU32::new(0);
        let budget = TimeoutBudget::new(Duration::from_secs(10), Duration::from_secs(1));
        let mut supersede = Supersede::never();

        let outcome = budget
            .poll_until(&mut supersede, || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                (n == 3).then_some(n)
            })
            .await;

        assert_eq!(outcome, PollOutcome::Ready(3));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_spans_the_step() {
        let budget = TimeoutBudget::new(Duration::from_secs(3), Duration::from_secs(1));
        let mut supersede = Supersede::never();

        let first = budget
            .poll_until(&mut supersede, || async { None::<()> })
            .await;
        assert_eq!(first, PollOutcome::TimedOut);

        // The second wait of the same step gets no fresh time.
        let calls = &AtomicU32::new(0);
        let second = budget
            .poll_until(&mut supersede, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                None::<()>
            })
            .await;
        assert_eq!(second, PollOutcome::TimedOut);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_trigger_supersedes_wait() {
        let (tx, rx) = watch::channel(0u64);
        let tx = Arc::new(tx);
        let mut supersede = Supersede::new(rx);
        let budget = TimeoutBudget::new(Duration::from_secs(60), Duration::from_secs(1));

        let bump = Arc::clone(&tx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            bump.send_modify(|g| *g += 1);
        });

        let outcome = budget
            .poll_until(&mut supersede, || async { None::<()> })
            .await;
        assert_eq!(outcome, PollOutcome::Superseded);
        assert!(supersede.is_superseded());
        assert!(budget.remaining() > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn superseded_pass_does_not_probe() {
        let (tx, rx) = watch::channel(0u64);
        let mut supersede = Supersede::new(rx);
        tx.send_modify(|g| *g += 1);
        let budget = TimeoutBudget::new(Duration::from_secs(60), Duration::from_secs(1));

        let outcome = budget
            .poll_until(&mut supersede, || async { Some(()) })
            .await;
        assert_eq!(outcome, PollOutcome::Superseded);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_generation_never_supersedes() {
        let (tx, rx) = watch::channel(0u64);
        let mut supersede = Supersede::new(rx);
        drop(tx);
        let budget = TimeoutBudget::new(Duration::from_secs(2), Duration::from_secs(1));

        let outcome = budget
            .poll_until(&mut supersede, || async { None::<()> })
            .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
    }
}
