//! Core data-model structs: ledgers, training jobs, buildings, credentials,
//! and the request/receipt payloads exchanged with the authority.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{BuildingKind, JobStatus, ResourceKind, TroopKind};
use crate::ids::{BuildingId, JobId, UserId};

// ---------------------------------------------------------------------------
// Resource amounts
// ---------------------------------------------------------------------------

/// A whole-unit amount of every resource kind.
///
/// Used for stockpiles, costs, accrual deltas and donations alike. All
/// arithmetic is checked; nothing here can wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResourceAmounts {
    /// Wood units.
    #[serde(default)]
    pub wood: u64,
    /// Stone units.
    #[serde(default)]
    pub stone: u64,
    /// Food units.
    #[serde(default)]
    pub food: u64,
    /// Iron units.
    #[serde(default)]
    pub iron: u64,
}

impl ResourceAmounts {
    /// The empty amount.
    pub const ZERO: Self = Self {
        wood: 0,
        stone: 0,
        food: 0,
        iron: 0,
    };

    /// Build an amount from explicit per-kind values.
    pub const fn new(wood: u64, stone: u64, food: u64, iron: u64) -> Self {
        Self {
            wood,
            stone,
            food,
            iron,
        }
    }

    /// Return the amount of one resource kind.
    pub const fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Wood => self.wood,
            ResourceKind::Stone => self.stone,
            ResourceKind::Food => self.food,
            ResourceKind::Iron => self.iron,
        }
    }

    /// Overwrite the amount of one resource kind.
    pub const fn set(&mut self, kind: ResourceKind, value: u64) {
        match kind {
            ResourceKind::Wood => self.wood = value,
            ResourceKind::Stone => self.stone = value,
            ResourceKind::Food => self.food = value,
            ResourceKind::Iron => self.iron = value,
        }
    }

    /// Whether every kind is zero.
    pub const fn is_zero(&self) -> bool {
        self.wood == 0 && self.stone == 0 && self.food == 0 && self.iron == 0
    }

    /// Whether `self` holds at least `cost` of every kind.
    pub const fn covers(&self, cost: &Self) -> bool {
        self.wood >= cost.wood
            && self.stone >= cost.stone
            && self.food >= cost.food
            && self.iron >= cost.iron
    }

    /// Add two amounts, returning `None` on overflow.
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self {
            wood: self.wood.checked_add(other.wood)?,
            stone: self.stone.checked_add(other.stone)?,
            food: self.food.checked_add(other.food)?,
            iron: self.iron.checked_add(other.iron)?,
        })
    }

    /// Subtract `other`, returning `None` if any kind would go negative.
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        Some(Self {
            wood: self.wood.checked_sub(other.wood)?,
            stone: self.stone.checked_sub(other.stone)?,
            food: self.food.checked_sub(other.food)?,
            iron: self.iron.checked_sub(other.iron)?,
        })
    }

    /// Subtract `other`, clamping each kind at zero.
    pub const fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            wood: self.wood.saturating_sub(other.wood),
            stone: self.stone.saturating_sub(other.stone),
            food: self.food.saturating_sub(other.food),
            iron: self.iron.saturating_sub(other.iron),
        }
    }

    /// Multiply every kind by `factor`, returning `None` on overflow.
    pub fn checked_scale(&self, factor: u64) -> Option<Self> {
        Some(Self {
            wood: self.wood.checked_mul(factor)?,
            stone: self.stone.checked_mul(factor)?,
            food: self.food.checked_mul(factor)?,
            iron: self.iron.checked_mul(factor)?,
        })
    }

    /// Sum of all kinds (saturating).
    pub const fn total(&self) -> u64 {
        self.wood
            .saturating_add(self.stone)
            .saturating_add(self.food)
            .saturating_add(self.iron)
    }
}

// ---------------------------------------------------------------------------
// Ledger and population
// ---------------------------------------------------------------------------

/// A village's resource ledger as reported by the authority.
///
/// The client only ever holds a cached projection of this; the authority's
/// copy is the ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResourceLedger {
    /// Stockpiled resources.
    pub resources: ResourceAmounts,
    /// Housing currently in use (trained and training units).
    pub population: u32,
    /// Total housing provided by buildings.
    pub max_population: u32,
    /// When the authority produced this snapshot.
    pub last_synced_at: DateTime<Utc>,
}

impl ResourceLedger {
    /// An empty ledger stamped at `now`.
    pub const fn empty(now: DateTime<Utc>) -> Self {
        Self {
            resources: ResourceAmounts::ZERO,
            population: 0,
            max_population: 0,
            last_synced_at: now,
        }
    }

    /// Whether the stockpile covers `cost`.
    pub const fn can_afford(&self, cost: &ResourceAmounts) -> bool {
        self.resources.covers(cost)
    }

    /// Free housing slots.
    pub const fn free_housing(&self) -> u32 {
        self.max_population.saturating_sub(self.population)
    }
}

/// Population figures polled independently of the full ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Population {
    /// Housing currently in use.
    pub population: u32,
    /// Total housing provided by buildings.
    pub max_population: u32,
}

/// Number of trained units per troop kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct UnitTotals {
    /// Trained units keyed by kind. Kinds with no units may be absent.
    pub counts: BTreeMap<TroopKind, u64>,
}

impl UnitTotals {
    /// Trained units of one kind.
    pub fn get(&self, kind: TroopKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Buildings
// ---------------------------------------------------------------------------

/// A building standing on the village grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Building {
    /// Unique building ID.
    pub id: BuildingId,
    /// What the building is.
    pub kind: BuildingKind,
    /// Upgrade level, starting at 1.
    pub level: u32,
    /// Grid column.
    pub x: u32,
    /// Grid row.
    pub y: u32,
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// A batch of units in the training queue.
///
/// `ends_at` is absolute. Remaining time is always derived from it and the
/// current clock, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TrainingJob {
    /// Unique job ID.
    pub id: JobId,
    /// Kind of unit being trained.
    pub troop_kind: TroopKind,
    /// Number of units in the batch.
    pub quantity: u32,
    /// When training started.
    pub started_at: DateTime<Utc>,
    /// When training finishes.
    pub ends_at: DateTime<Utc>,
    /// Server-side status.
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A bearer credential with an absolute expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    /// Opaque bearer token.
    pub token: String,
    /// When the authority stops accepting the token.
    pub expires_at: DateTime<Utc>,
}

impl core::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Requests and receipts
// ---------------------------------------------------------------------------

/// Body of a start-training request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StartTrainingRequest {
    /// Kind of unit to train.
    pub troop_kind: TroopKind,
    /// Barracks doing the training.
    pub building_id: BuildingId,
    /// Batch size.
    pub quantity: u32,
}

/// Authority response to a successful start-training request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TrainingReceipt {
    /// The queued job.
    pub job: TrainingJob,
    /// Ledger after the cost was paid.
    pub ledger: ResourceLedger,
}

/// Authority response to a successful completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CompletionReceipt {
    /// The job that was completed and removed.
    pub job_id: JobId,
    /// Ledger after completion.
    pub ledger: ResourceLedger,
    /// Unit totals after completion.
    pub units: UnitTotals,
}

/// Body of a donation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DonationRequest {
    /// Player receiving the resources.
    pub recipient: UserId,
    /// Resources to hand over.
    pub amounts: ResourceAmounts,
}

/// Body of a move-building request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MoveBuildingRequest {
    /// Target grid column.
    pub x: u32,
    /// Target grid row.
    pub y: u32,
}

/// Body of an offline-accrual claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AccrualClaimRequest {
    /// Whole minutes the player was away.
    pub elapsed_minutes: u64,
}

/// A freshly seeded village and the credential to act on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillageSeed {
    /// Owner of the new village.
    pub user_id: UserId,
    /// Credential for the owner.
    pub credential: SessionCredential,
    /// Buildings the village starts with.
    pub buildings: Vec<Building>,
}
