//! Time-based synchronization engine for the Hamlet village client.
//!
//! The authority owns the truth. This crate keeps a cached projection of it
//! consistent enough for the UI: resources that accrue while the player is
//! on- or offline, training countdowns that end in confirmed completions,
//! optimistic mutations that are always replaced by authoritative
//! snapshots, and a session credential that renews itself in the
//! background.
//!
//! # Modules
//!
//! - [`engine`] -- [`SyncEngine`], the per-player context that owns every
//!   timer, subscription and projection.
//! - [`accrual`] -- Offline catch-up flow around the shared accrual math.
//! - [`training`] -- Training queue tracker and countdown formatting.
//! - [`reconcile`] -- Optimistic mutations, the [`Projection`], and
//!   replace-don't-merge reconciliation.
//! - [`bus`] -- Per-user publish/subscribe for "resources changed".
//! - [`watchdog`] -- Single-flight credential renewal with backoff.
//! - [`session`] -- Authorized calls with one renew-and-retry.
//! - [`storage`] -- [`LocalStore`] for the last-session stamp and credential.
//! - [`timers`] -- [`TimerSet`], named tasks aborted together.
//! - [`config`] -- [`SyncConfig`] loaded from YAML with env overrides.
//! - [`error`] -- [`SyncError`].
//!
//! [`Projection`]: reconcile::Projection
//! [`LocalStore`]: storage::LocalStore
//! [`TimerSet`]: timers::TimerSet

pub mod accrual;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod session;
pub mod storage;
pub mod timers;
pub mod training;
pub mod watchdog;

pub use accrual::{Claimable, OfflineAccrual, OfflineCheck};
pub use bus::{EventBus, Subscription};
pub use config::{ConfigError, SyncConfig};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use reconcile::{MutationKind, MutationPhase, MutationRecord, Projection, Reconciler};
pub use session::Session;
pub use storage::{FileStore, LocalStore, MemoryStore, StoreError, StoreKey, StorePurpose};
pub use timers::TimerSet;
pub use training::{CompletionGuard, CompletionState, JobView, TrainingTracker, format_remaining};
pub use watchdog::{SessionEvent, Watchdog};
