//! Training queue countdowns and completion requests.
//!
//! Each tracked job moves through:
//!
//! | State | Meaning |
//! |-------|---------|
//! | [`CompletionState::Training`] | Countdown running, nothing sent |
//! | [`CompletionState::Requested`] | Countdown hit zero, completion sent |
//! | [`CompletionState::AwaitingCollect`] | The request failed; the player may collect manually |
//!
//! The client never marks a job complete on its own. A job leaves the
//! tracker only when the authority confirms completion (or answers that it
//! was already completed), or when a queue re-fetch no longer lists it.
//! Remaining time is always derived from `ends_at` and the clock.
//!
//! Requests in flight are held by a [`CompletionGuard`]. A request that is
//! dropped before it settles (its task was aborted at shutdown) leaves the
//! job in [`CompletionState::AwaitingCollect`] rather than stuck as
//! requested.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hamlet_types::{JobId, TrainingJob, TroopKind};

use crate::error::SyncError;

/// Local completion state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// Countdown running.
    Training,
    /// Completion request in flight.
    Requested,
    /// Finished but not collected; offer a manual collect.
    AwaitingCollect,
}

/// Display row for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    /// Job ID.
    pub id: JobId,
    /// Kind of unit.
    pub troop_kind: TroopKind,
    /// Units in the batch.
    pub quantity: u32,
    /// When training finishes.
    pub ends_at: DateTime<Utc>,
    /// Time left, never negative.
    pub remaining: Duration,
    /// `remaining` formatted for display.
    pub label: String,
    /// Local completion state.
    pub state: CompletionState,
}

impl JobView {
    /// Whether the UI should offer a "collect" button.
    pub const fn can_collect(&self) -> bool {
        matches!(self.state, CompletionState::AwaitingCollect)
    }
}

/// Time left on `job` at `now`, clamped at zero.
pub fn remaining(job: &TrainingJob, now: DateTime<Utc>) -> Duration {
    job.ends_at
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Format a countdown as `m:ss`, or `h:mm:ss` from one hour up.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    job: TrainingJob,
    state: CompletionState,
}

/// The client's view of the training queue.
#[derive(Debug, Default)]
pub struct TrainingTracker {
    jobs: BTreeMap<JobId, Tracked>,
}

impl TrainingTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Local state of one job.
    pub fn state(&self, id: JobId) -> Option<CompletionState> {
        self.jobs.get(&id).map(|t| t.state)
    }

    /// Start tracking a job the authority just accepted.
    pub fn insert(&mut self, job: TrainingJob) {
        self.jobs.entry(job.id).or_insert(Tracked {
            job,
            state: CompletionState::Training,
        });
    }

    /// Replace the queue with an authoritative listing.
    ///
    /// Jobs still listed keep their local state; new jobs start as
    /// [`CompletionState::Training`]; jobs no longer listed are dropped.
    pub fn replace_queue(&mut self, jobs: Vec<TrainingJob>) {
        let mut next = BTreeMap::new();
        for job in jobs {
            let state = self
                .jobs
                .get(&job.id)
                .map_or(CompletionState::Training, |t| t.state);
            next.insert(job.id, Tracked { job, state });
        }
        self.jobs = next;
    }

    /// Advance countdowns to `now`. Returns jobs that just became due, now
    /// marked [`CompletionState::Requested`].
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        self.jobs
            .values_mut()
            .filter(|t| t.state == CompletionState::Training && now >= t.job.ends_at)
            .map(|t| {
                t.state = CompletionState::Requested;
                t.job.id
            })
            .collect()
    }

    /// Mark a job for a manual collect request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownJob`] if the job is not tracked, or
    /// [`SyncError::NotDue`] if its countdown has not finished.
    pub fn begin_collect(&mut self, id: JobId, now: DateTime<Utc>) -> Result<(), SyncError> {
        let tracked = self.jobs.get_mut(&id).ok_or(SyncError::UnknownJob(id))?;
        if now < tracked.job.ends_at {
            return Err(SyncError::NotDue(id));
        }
        tracked.state = CompletionState::Requested;
        Ok(())
    }

    /// The authority confirmed completion (or that it already happened).
    /// Returns whether the job was tracked.
    pub fn confirm_completed(&mut self, id: JobId) -> bool {
        self.jobs.remove(&id).is_some()
    }

    /// The completion request failed. The job stays listed and can be
    /// collected manually.
    pub fn completion_failed(&mut self, id: JobId) {
        if let Some(tracked) = self.jobs.get_mut(&id) {
            tracked.state = CompletionState::AwaitingCollect;
        }
    }

    /// A completion request was abandoned without an answer. Only a job
    /// still marked requested moves to [`CompletionState::AwaitingCollect`].
    pub fn release(&mut self, id: JobId) {
        if let Some(tracked) = self
            .jobs
            .get_mut(&id)
            .filter(|t| t.state == CompletionState::Requested)
        {
            tracked.state = CompletionState::AwaitingCollect;
        }
    }

    /// Time left on one job.
    pub fn remaining(&self, id: JobId, now: DateTime<Utc>) -> Option<Duration> {
        self.jobs.get(&id).map(|t| remaining(&t.job, now))
    }

    /// Display rows, oldest job first.
    pub fn views(&self, now: DateTime<Utc>) -> Vec<JobView> {
        self.jobs
            .values()
            .map(|t| {
                let left = remaining(&t.job, now);
                JobView {
                    id: t.job.id,
                    troop_kind: t.job.troop_kind,
                    quantity: t.job.quantity,
                    ends_at: t.job.ends_at,
                    remaining: left,
                    label: format_remaining(left),
                    state: t.state,
                }
            })
            .collect()
    }
}

/// Completion requests in flight for a set of jobs.
///
/// Jobs not yet [`settle`](Self::settle)d when the guard drops are
/// [`release`](TrainingTracker::release)d.
#[derive(Debug)]
pub struct CompletionGuard<'a> {
    tracker: &'a Mutex<TrainingTracker>,
    pending: Vec<JobId>,
}

impl<'a> CompletionGuard<'a> {
    /// Hold `jobs`, which must already be marked requested in `tracker`.
    pub const fn new(tracker: &'a Mutex<TrainingTracker>, jobs: Vec<JobId>) -> Self {
        Self {
            tracker,
            pending: jobs,
        }
    }

    /// The request for `id` got an answer; its outcome is already recorded.
    pub fn settle(&mut self, id: JobId) {
        self.pending.retain(|pending| *pending != id);
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        for id in self.pending.drain(..) {
            tracker.release(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use hamlet_types::JobStatus;

    use super::*;

    fn job(start: DateTime<Utc>, minutes: i64) -> TrainingJob {
        TrainingJob {
            id: JobId::new(),
            troop_kind: TroopKind::Spearman,
            quantity: 1,
            started_at: start,
            ends_at: start + TimeDelta::minutes(minutes),
            status: JobStatus::Training,
        }
    }

    #[test]
    fn formats_short_and_long_countdowns() {
        assert_eq!(format_remaining(Duration::from_secs(119)), "1:59");
        assert_eq!(format_remaining(Duration::from_secs(1)), "0:01");
        assert_eq!(format_remaining(Duration::ZERO), "0:00");
        assert_eq!(format_remaining(Duration::from_secs(3600)), "1:00:00");
        assert_eq!(format_remaining(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn remaining_decreases_to_zero_and_stops() {
        let start = Utc::now();
        let j = job(start, 2);
        let mut previous = remaining(&j, start);
        for second in 1..=120 {
            let now = start + TimeDelta::seconds(second);
            let left = remaining(&j, now);
            assert!(left < previous);
            previous = left;
        }
        assert_eq!(previous, Duration::ZERO);
        assert_eq!(remaining(&j, start + TimeDelta::seconds(500)), Duration::ZERO);
    }

    #[test]
    fn completion_is_requested_exactly_at_end_time() {
        let start = Utc::now();
        let j = job(start, 2);
        let id = j.id;
        let mut tracker = TrainingTracker::new();
        tracker.insert(j);

        let almost = start + TimeDelta::seconds(119);
        assert!(tracker.tick(almost).is_empty());
        assert!(tracker.remaining(id, almost).is_some_and(|r| r > Duration::ZERO));

        let due = start + TimeDelta::seconds(120);
        assert_eq!(tracker.tick(due), vec![id]);
        assert_eq!(tracker.state(id), Some(CompletionState::Requested));
        // Not requested twice.
        assert!(tracker.tick(due + TimeDelta::seconds(1)).is_empty());
    }

    #[test]
    fn failed_completion_offers_collect() {
        let start = Utc::now();
        let j = job(start, 1);
        let id = j.id;
        let mut tracker = TrainingTracker::new();
        tracker.insert(j);
        let due = start + TimeDelta::minutes(1);
        assert_eq!(tracker.tick(due).len(), 1);

        tracker.completion_failed(id);
        let views = tracker.views(due);
        assert_eq!(views.len(), 1);
        assert!(views.first().is_some_and(JobView::can_collect));

        assert!(tracker.begin_collect(id, due).is_ok());
        assert_eq!(tracker.state(id), Some(CompletionState::Requested));
        assert!(tracker.confirm_completed(id));
        assert!(tracker.is_empty());
        assert!(!tracker.confirm_completed(id));
    }

    #[test]
    fn collect_before_end_is_refused() {
        let start = Utc::now();
        let j = job(start, 5);
        let id = j.id;
        let mut tracker = TrainingTracker::new();
        tracker.insert(j);
        assert!(matches!(
            tracker.begin_collect(id, start),
            Err(SyncError::NotDue(_))
        ));
        assert!(matches!(
            tracker.begin_collect(JobId::new(), start),
            Err(SyncError::UnknownJob(_))
        ));
    }

    #[test]
    fn replace_queue_keeps_local_state_and_drops_missing_jobs() {
        let start = Utc::now();
        let a = job(start, 1);
        let b = job(start, 3);
        let c = job(start, 4);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        let mut tracker = TrainingTracker::new();
        tracker.insert(a.clone());
        tracker.insert(b);
        assert_eq!(tracker.tick(start + TimeDelta::minutes(1)), vec![a_id]);
        tracker.completion_failed(a_id);

        let mut listed = a;
        listed.status = JobStatus::Completed;
        tracker.replace_queue(vec![listed, c]);

        assert_eq!(tracker.state(a_id), Some(CompletionState::AwaitingCollect));
        assert_eq!(tracker.state(b_id), None);
        assert_eq!(tracker.state(c_id), Some(CompletionState::Training));
    }

    #[test]
    fn dropped_request_falls_back_to_collect() {
        let start = Utc::now();
        let (a, b) = (job(start, 1), job(start, 1));
        let (a_id, b_id) = (a.id, b.id);
        let mut tracker = TrainingTracker::new();
        tracker.insert(a);
        tracker.insert(b);
        let due = tracker.tick(start + TimeDelta::minutes(1));
        assert_eq!(due.len(), 2);
        let tracker = Mutex::new(tracker);

        {
            let mut guard = CompletionGuard::new(&tracker, due);
            // `a` got its answer; `b` was still in flight when dropped.
            tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .confirm_completed(a_id);
            guard.settle(a_id);
        }

        let mut tracker = tracker.into_inner().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(tracker.state(a_id), None);
        assert_eq!(tracker.state(b_id), Some(CompletionState::AwaitingCollect));
        assert!(tracker.tick(start + TimeDelta::minutes(5)).is_empty());
    }

    #[test]
    fn release_leaves_other_states_alone() {
        let start = Utc::now();
        let j = job(start, 3);
        let id = j.id;
        let mut tracker = TrainingTracker::new();
        tracker.insert(j);
        tracker.release(id);
        assert_eq!(tracker.state(id), Some(CompletionState::Training));
    }
}
