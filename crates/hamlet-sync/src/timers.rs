//! Owned background tasks.
//!
//! A [`TimerSet`] holds the [`JoinHandle`] of every task the engine spawns,
//! by name. Cancelling the set (or dropping it) aborts every task, so no
//! timer outlives the scope that started it.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Shortest period a recurring timer may use.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A named collection of spawned tasks, aborted together.
#[derive(Debug, Default)]
pub struct TimerSet {
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl TimerSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a one-shot task owned by this set.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|(_, h)| !h.is_finished());
        tasks.push((name, handle));
    }

    /// Spawn a task that runs `tick` every `period`, starting immediately.
    ///
    /// A tick that overruns its period delays the next one instead of
    /// bursting to catch up.
    pub fn spawn_every<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        self.spawn(name, async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        debug!(timer = name, period_ms = period.as_millis(), "timer started");
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Names of tasks still running.
    pub fn names(&self) -> Vec<&'static str> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Abort every task.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };
        for (name, handle) in drained {
            handle.abort();
            debug!(timer = name, "timer cancelled");
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in tasks.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting(set: &TimerSet, period: Duration) -> Arc<AtomicU32> {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        set.spawn_every("count", period, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_timer_fires_every_period() {
        let set = TimerSet::new();
        let count = counting(&set, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        // Immediate first tick, then at 1s, 2s, 3s.
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(set.active(), 1);
        assert_eq!(set.names(), vec!["count"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_timers() {
        let set = TimerSet::new();
        let count = counting(&set, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        set.cancel_all();
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert_eq!(set.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_set_aborts_tasks() {
        let set = TimerSet::new();
        let count = counting(&set, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(set);
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_one_shots_are_pruned() {
        let set = TimerSet::new();
        set.spawn("once", async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(set.active(), 0);
    }
}
