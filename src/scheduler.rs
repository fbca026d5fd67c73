//! Periodic refresh and diagnostic schedulers
//!
//! Each scheduler is a task driven by a `tokio::time::interval` with
//! [`MissedTickBehavior::Skip`]: a tick runs to completion before the next
//! one can start, and ticks missed while busy are dropped rather than queued.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Spawn a task that calls `tick` every `period` until cancelled or until
/// `tick` returns `ControlFlow::Break`.
pub fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if tick().is_break() {
                        break;
                    }
                }
            }
        }
        debug!(scheduler = name, "scheduler stopped");
    })
}

/// The refresh and diagnostic schedulers of one running interval.
///
/// Dropping the set cancels both tasks.
#[derive(Debug)]
pub struct SchedulerSet {
    cancel: CancellationToken,
    refresh: JoinHandle<()>,
    diagnostic: JoinHandle<()>,
}

impl SchedulerSet {
    pub fn spawn<R, D>(
        refresh_period: Duration,
        diagnostic_period: Duration,
        refresh: R,
        diagnostic: D,
    ) -> Self
    where
        R: FnMut() -> ControlFlow<()> + Send + 'static,
        D: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        Self {
            refresh: spawn_periodic("refresh", refresh_period, cancel.clone(), refresh),
            diagnostic: spawn_periodic("diagnostic", diagnostic_period, cancel.clone(), diagnostic),
            cancel,
        }
    }

    /// Whether either task is still running
    pub fn is_running(&self) -> bool {
        !self.refresh.is_finished() || !self.diagnostic.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SchedulerSet {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.refresh.abort();
        self.diagnostic.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> ControlFlow<()> + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_periods_are_independent() {
        let (refreshes, refresh) = counter();
        let (dumps, dump) = counter();

        let set = SchedulerSet::spawn(Duration::from_secs(1), Duration::from_secs(10), refresh, dump);

        // First tick fires immediately, then once per period
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 11);
        assert_eq!(dumps.load(Ordering::SeqCst), 2);
        assert!(set.is_running());
        set.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_ticks() {
        let (refreshes, refresh) = counter();
        let (_, dump) = counter();

        let set = SchedulerSet::spawn(Duration::from_secs(1), Duration::from_secs(10), refresh, dump);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        set.stop();

        let seen = refreshes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_ends_task() {
        let cancel = CancellationToken::new();
        let handle = spawn_periodic("once", Duration::from_secs(1), cancel, || ControlFlow::Break(()));

        handle.await.unwrap();
    }
}
