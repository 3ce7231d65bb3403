//! A single village as the authority sees it, and the rules that mutate it.
//!
//! # Production
//!
//! Online production is settled lazily whenever the village is touched.
//! Gaps shorter than the online threshold are credited in whole minutes
//! (the leftover seconds stay unsettled); longer gaps are skipped because
//! the player claims them through the offline-accrual flow instead. This
//! keeps a minute from ever being credited twice.
//!
//! # Training
//!
//! A job's status is derived from `ends_at` at read time. Completing a job
//! that is no longer in the queue is a [`AuthorityError::Conflict`], which
//! clients treat as success.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use hamlet_types::{
    Building, BuildingId, BuildingKind, CompletionReceipt, JobId, JobStatus, Population,
    ProductionRates, RejectionReason, ResourceAmounts, ResourceLedger, StartTrainingRequest,
    TrainingJob, TrainingReceipt, UnitTotals, UserId, compute_accrual, whole_minutes_between,
};

use crate::error::AuthorityError;

/// Resources every new village starts with.
const STARTING_RESOURCES: ResourceAmounts = ResourceAmounts::new(500, 300, 400, 100);

/// Starting layout: kind and grid cell.
const STARTING_LAYOUT: [(BuildingKind, u32, u32); 7] = [
    (BuildingKind::TownHall, 20, 20),
    (BuildingKind::House, 18, 20),
    (BuildingKind::Farm, 22, 20),
    (BuildingKind::Sawmill, 20, 18),
    (BuildingKind::Quarry, 20, 22),
    (BuildingKind::IronMine, 22, 22),
    (BuildingKind::Barracks, 18, 18),
];

/// Authoritative state of one player's village.
#[derive(Debug, Clone)]
pub struct Village {
    user_id: UserId,
    resources: ResourceAmounts,
    buildings: BTreeMap<BuildingId, Building>,
    jobs: BTreeMap<JobId, TrainingJob>,
    units: UnitTotals,
    last_settled_at: DateTime<Utc>,
    last_claim_at: DateTime<Utc>,
}

impl Village {
    /// Found a new village with the starting layout.
    pub fn found(user_id: UserId, now: DateTime<Utc>) -> Self {
        let buildings = STARTING_LAYOUT
            .iter()
            .map(|&(kind, x, y)| {
                let id = BuildingId::new();
                (
                    id,
                    Building {
                        id,
                        kind,
                        level: 1,
                        x,
                        y,
                    },
                )
            })
            .collect();
        Self {
            user_id,
            resources: STARTING_RESOURCES,
            buildings,
            jobs: BTreeMap::new(),
            units: UnitTotals::default(),
            last_settled_at: now,
            last_claim_at: now,
        }
    }

    /// Owner of the village.
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Current stockpile (without settling).
    pub const fn resources(&self) -> ResourceAmounts {
        self.resources
    }

    /// Overwrite the stockpile. Used for seeding scenarios.
    pub const fn set_resources(&mut self, resources: ResourceAmounts) {
        self.resources = resources;
    }

    /// Add or replace a building. Used for seeding scenarios.
    pub fn put_building(&mut self, building: Building) {
        self.buildings.insert(building.id, building);
    }

    /// Buildings sorted by ID.
    pub fn buildings(&self) -> Vec<Building> {
        self.buildings.values().cloned().collect()
    }

    /// Production rates summed over every generator.
    pub fn rates(&self) -> ProductionRates {
        ProductionRates::from_buildings(self.buildings.values())
    }

    /// Credit online production up to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::ArithmeticOverflow`] if the stockpile would
    /// overflow.
    pub fn settle(&mut self, now: DateTime<Utc>, online_gap_minutes: u64) -> Result<(), AuthorityError> {
        let minutes = whole_minutes_between(self.last_settled_at, now);
        if minutes >= online_gap_minutes {
            self.last_settled_at = now;
            return Ok(());
        }
        if minutes == 0 {
            return Ok(());
        }
        let delta = compute_accrual(&self.rates(), minutes);
        self.resources = self
            .resources
            .checked_add(&delta)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        let step = i64::try_from(minutes)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        self.last_settled_at = self
            .last_settled_at
            .checked_add_signed(step)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Housing used by trained and training units.
    pub fn population(&self) -> u32 {
        let trained = self.units.counts.iter().fold(0_u32, |acc, (kind, count)| {
            let per_unit = u64::from(kind.profile().housing);
            let housing = u32::try_from(count.saturating_mul(per_unit)).unwrap_or(u32::MAX);
            acc.saturating_add(housing)
        });
        self.jobs.values().fold(trained, |acc, job| {
            acc.saturating_add(job.troop_kind.batch_housing(job.quantity).unwrap_or(u32::MAX))
        })
    }

    /// Housing provided by buildings.
    pub fn max_population(&self) -> u32 {
        self.buildings
            .values()
            .fold(0_u32, |acc, b| acc.saturating_add(b.kind.housing(b.level)))
    }

    /// Population figures.
    pub fn population_snapshot(&self) -> Population {
        Population {
            population: self.population(),
            max_population: self.max_population(),
        }
    }

    /// Ledger snapshot stamped at `now`.
    pub fn ledger(&self, now: DateTime<Utc>) -> ResourceLedger {
        ResourceLedger {
            resources: self.resources,
            population: self.population(),
            max_population: self.max_population(),
            last_synced_at: now,
        }
    }

    /// Unit totals.
    pub fn units(&self) -> UnitTotals {
        self.units.clone()
    }

    /// Minutes of offline production that may still be claimed.
    ///
    /// The request is clamped to the time since the last claim and to
    /// `max_minutes`, so a repeated claim cannot credit the same window
    /// twice.
    pub fn claimable_minutes(&self, requested: u64, now: DateTime<Utc>, max_minutes: u64) -> u64 {
        let since_claim = whole_minutes_between(self.last_claim_at, now);
        requested.min(since_claim).min(max_minutes)
    }

    /// What a claim of `requested` minutes would credit.
    pub fn preview_offline(
        &self,
        requested: u64,
        now: DateTime<Utc>,
        max_minutes: u64,
    ) -> ResourceAmounts {
        let minutes = self.claimable_minutes(requested, now, max_minutes);
        compute_accrual(&self.rates(), minutes)
    }

    /// Credit offline production and restart the claim window.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::ArithmeticOverflow`] if the stockpile would
    /// overflow.
    pub fn claim_offline(
        &mut self,
        requested: u64,
        now: DateTime<Utc>,
        max_minutes: u64,
    ) -> Result<ResourceAmounts, AuthorityError> {
        let delta = self.preview_offline(requested, now, max_minutes);
        self.resources = self
            .resources
            .checked_add(&delta)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        self.last_claim_at = now;
        Ok(delta)
    }

    /// Training queue with statuses derived at `now`.
    pub fn queue(&self, now: DateTime<Utc>) -> Vec<TrainingJob> {
        self.jobs
            .values()
            .map(|job| {
                let mut job = job.clone();
                job.status = if now >= job.ends_at {
                    JobStatus::Completed
                } else {
                    JobStatus::Training
                };
                job
            })
            .collect()
    }

    /// Queue a training batch and pay for it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Rejected`] when the barracks, quantity,
    /// cost or housing rules fail.
    pub fn start_training(
        &mut self,
        request: &StartTrainingRequest,
        now: DateTime<Utc>,
    ) -> Result<TrainingReceipt, AuthorityError> {
        if request.quantity == 0 {
            return Err(AuthorityError::rejected(
                RejectionReason::InvalidQuantity,
                "quantity must be at least 1",
            ));
        }
        let barracks = self.buildings.get(&request.building_id).ok_or_else(|| {
            AuthorityError::rejected(
                RejectionReason::NotFound,
                format!("building {} not found", request.building_id),
            )
        })?;
        if barracks.kind != BuildingKind::Barracks {
            return Err(AuthorityError::rejected(
                RejectionReason::InvalidTarget,
                "troops can only be trained at a barracks",
            ));
        }
        let profile = request.troop_kind.profile();
        if barracks.level < profile.barracks_level {
            return Err(AuthorityError::rejected(
                RejectionReason::LevelRequirement,
                format!(
                    "{:?} needs barracks level {}",
                    request.troop_kind, profile.barracks_level
                ),
            ));
        }

        let cost = request
            .troop_kind
            .batch_cost(request.quantity)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        let remaining = self.resources.checked_sub(&cost).ok_or_else(|| {
            AuthorityError::rejected(
                RejectionReason::InsufficientResources,
                "not enough resources for this batch",
            )
        })?;

        let housing = request
            .troop_kind
            .batch_housing(request.quantity)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        let needed = self
            .population()
            .checked_add(housing)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        if needed > self.max_population() {
            return Err(AuthorityError::rejected(
                RejectionReason::PopulationCap,
                "not enough housing for this batch",
            ));
        }

        let minutes = request
            .troop_kind
            .batch_minutes(request.quantity)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        let ends_at = TimeDelta::try_minutes(i64::from(minutes))
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(AuthorityError::ArithmeticOverflow)?;

        let job = TrainingJob {
            id: JobId::new(),
            troop_kind: request.troop_kind,
            quantity: request.quantity,
            started_at: now,
            ends_at,
            status: JobStatus::Training,
        };
        self.resources = remaining;
        self.jobs.insert(job.id, job.clone());

        Ok(TrainingReceipt {
            job,
            ledger: self.ledger(now),
        })
    }

    /// Collect a finished job.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Conflict`] if the job is not in the queue
    /// (already collected), or [`AuthorityError::Rejected`] with
    /// [`RejectionReason::StillTraining`] if it has not finished.
    pub fn complete_training(
        &mut self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<CompletionReceipt, AuthorityError> {
        let job = self.jobs.get(&job_id).ok_or_else(|| {
            AuthorityError::Conflict(format!("job {job_id} already completed or unknown"))
        })?;
        if now < job.ends_at {
            return Err(AuthorityError::rejected(
                RejectionReason::StillTraining,
                format!("job {job_id} finishes at {}", job.ends_at),
            ));
        }
        let kind = job.troop_kind;
        let quantity = u64::from(job.quantity);
        self.jobs.remove(&job_id);

        let count = self.units.counts.entry(kind).or_insert(0);
        *count = count
            .checked_add(quantity)
            .ok_or(AuthorityError::ArithmeticOverflow)?;

        Ok(CompletionReceipt {
            job_id,
            ledger: self.ledger(now),
            units: self.units.clone(),
        })
    }

    /// Remove `amounts` from the stockpile for a donation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Rejected`] if the stockpile is too small
    /// or the amount is empty.
    pub fn debit(&mut self, amounts: &ResourceAmounts) -> Result<(), AuthorityError> {
        if amounts.is_zero() {
            return Err(AuthorityError::rejected(
                RejectionReason::InvalidQuantity,
                "donation must include at least one resource",
            ));
        }
        self.resources = self.resources.checked_sub(amounts).ok_or_else(|| {
            AuthorityError::rejected(
                RejectionReason::InsufficientResources,
                "not enough resources to donate",
            )
        })?;
        Ok(())
    }

    /// Add `amounts` to the stockpile.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::ArithmeticOverflow`] on overflow.
    pub fn credit(&mut self, amounts: &ResourceAmounts) -> Result<(), AuthorityError> {
        self.resources = self
            .resources
            .checked_add(amounts)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Move a building to `(x, y)` on a `grid_size` square grid.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Rejected`] if the building is missing or
    /// the cell is out of bounds or occupied.
    pub fn move_building(
        &mut self,
        building_id: BuildingId,
        x: u32,
        y: u32,
        grid_size: u32,
    ) -> Result<(), AuthorityError> {
        if x >= grid_size || y >= grid_size {
            return Err(AuthorityError::rejected(
                RejectionReason::InvalidPosition,
                format!("({x}, {y}) is outside the {grid_size}x{grid_size} grid"),
            ));
        }
        let occupied = self
            .buildings
            .values()
            .any(|b| b.id != building_id && b.x == x && b.y == y);
        if occupied {
            return Err(AuthorityError::rejected(
                RejectionReason::InvalidPosition,
                format!("({x}, {y}) is occupied"),
            ));
        }
        let building = self.buildings.get_mut(&building_id).ok_or_else(|| {
            AuthorityError::rejected(
                RejectionReason::NotFound,
                format!("building {building_id} not found"),
            )
        })?;
        building.x = x;
        building.y = y;
        Ok(())
    }

    /// Remove a building.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Rejected`] if the building is missing, is
    /// the town hall, or provides housing that is still in use.
    pub fn delete_building(&mut self, building_id: BuildingId) -> Result<(), AuthorityError> {
        let building = self.buildings.get(&building_id).ok_or_else(|| {
            AuthorityError::rejected(
                RejectionReason::NotFound,
                format!("building {building_id} not found"),
            )
        })?;
        if !building.kind.is_removable() {
            return Err(AuthorityError::rejected(
                RejectionReason::InvalidTarget,
                format!("{:?} cannot be removed", building.kind),
            ));
        }
        let remaining_housing = self
            .max_population()
            .saturating_sub(building.kind.housing(building.level));
        if remaining_housing < self.population() {
            return Err(AuthorityError::rejected(
                RejectionReason::PopulationCap,
                "housing is still in use",
            ));
        }
        self.buildings.remove(&building_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hamlet_types::TroopKind;

    use super::*;

    fn village_at(now: DateTime<Utc>) -> Village {
        Village::found(UserId::new(), now)
    }

    fn barracks_id(village: &Village) -> BuildingId {
        village
            .buildings()
            .iter()
            .find(|b| b.kind == BuildingKind::Barracks)
            .map(|b| b.id)
            .unwrap_or_default()
    }

    fn spearmen(village: &Village, quantity: u32) -> StartTrainingRequest {
        StartTrainingRequest {
            troop_kind: TroopKind::Spearman,
            building_id: barracks_id(village),
            quantity,
        }
    }

    #[test]
    fn starting_village_produces_every_resource() {
        let village = village_at(Utc::now());
        let rates = village.rates();
        assert!(rates.is_producing());
        assert_eq!(village.max_population(), 30);
        assert_eq!(village.population(), 0);
    }

    #[test]
    fn short_gaps_settle_in_whole_minutes() {
        let start = Utc::now();
        let mut village = village_at(start);
        let later = start + TimeDelta::seconds(90);
        assert!(village.settle(later, 2).is_ok());
        // One whole minute at 5 wood/min on top of 500.
        assert_eq!(village.resources().wood, 505);
        // The leftover 30 seconds count toward the next minute.
        assert!(village.settle(later + TimeDelta::seconds(30), 2).is_ok());
        assert_eq!(village.resources().wood, 510);
    }

    #[test]
    fn long_gaps_are_left_to_the_offline_claim() {
        let start = Utc::now();
        let mut village = village_at(start);
        assert!(village.settle(start + TimeDelta::minutes(45), 2).is_ok());
        assert_eq!(village.resources(), STARTING_RESOURCES);
    }

    #[test]
    fn offline_claim_is_clamped_to_time_since_last_claim() {
        let start = Utc::now();
        let mut village = village_at(start);
        let now = start + TimeDelta::minutes(42);
        let credited = village.claim_offline(42, now, 1440);
        assert_eq!(credited.ok(), Some(ResourceAmounts::new(210, 126, 168, 84)));
        // A second claim for the same window credits nothing.
        let again = village.claim_offline(42, now, 1440);
        assert_eq!(again.ok(), Some(ResourceAmounts::ZERO));
    }

    #[test]
    fn offline_claim_respects_cap() {
        let start = Utc::now();
        let village = village_at(start);
        let now = start + TimeDelta::days(3);
        assert_eq!(village.claimable_minutes(10_000, now, 1440), 1440);
    }

    #[test]
    fn training_pays_cost_and_reserves_housing() {
        let now = Utc::now();
        let mut village = village_at(now);
        let receipt = village.start_training(&spearmen(&village, 2), now);
        assert!(receipt.is_ok());
        let receipt = receipt.ok();
        let ledger = receipt.as_ref().map(|r| r.ledger.clone());
        assert_eq!(
            ledger.as_ref().map(|l| l.resources),
            Some(ResourceAmounts::new(400, 300, 340, 80))
        );
        assert_eq!(ledger.map(|l| l.population), Some(2));
        let ends_in = receipt.map(|r| r.job.ends_at.signed_duration_since(now).num_minutes());
        assert_eq!(ends_in, Some(4));
    }

    #[test]
    fn training_rejections() {
        let now = Utc::now();
        let mut village = village_at(now);

        let zero = village.start_training(&spearmen(&village, 0), now);
        assert!(matches!(
            zero,
            Err(AuthorityError::Rejected { reason: RejectionReason::InvalidQuantity, .. })
        ));

        let mut cavalry = spearmen(&village, 1);
        cavalry.troop_kind = TroopKind::Cavalry;
        assert!(matches!(
            village.start_training(&cavalry, now),
            Err(AuthorityError::Rejected { reason: RejectionReason::LevelRequirement, .. })
        ));

        let broke = village.start_training(&spearmen(&village, 11), now);
        assert!(matches!(
            broke,
            Err(AuthorityError::Rejected { reason: RejectionReason::InsufficientResources, .. })
        ));

        village.set_resources(ResourceAmounts::new(100_000, 0, 100_000, 100_000));
        let crowded = village.start_training(&spearmen(&village, 31), now);
        assert!(matches!(
            crowded,
            Err(AuthorityError::Rejected { reason: RejectionReason::PopulationCap, .. })
        ));
    }

    #[test]
    fn completion_is_gated_on_time_and_idempotent() {
        let now = Utc::now();
        let mut village = village_at(now);
        let job_id = village
            .start_training(&spearmen(&village, 1), now)
            .map(|r| r.job.id)
            .unwrap_or_default();

        let early = village.complete_training(job_id, now + TimeDelta::seconds(119));
        assert!(matches!(
            early,
            Err(AuthorityError::Rejected { reason: RejectionReason::StillTraining, .. })
        ));

        let done = village.complete_training(job_id, now + TimeDelta::seconds(120));
        assert_eq!(done.map(|r| r.units.get(TroopKind::Spearman)).ok(), Some(1));

        let again = village.complete_training(job_id, now + TimeDelta::seconds(121));
        assert!(matches!(again, Err(AuthorityError::Conflict(_))));
    }

    #[test]
    fn queue_status_is_derived_from_end_time() {
        let now = Utc::now();
        let mut village = village_at(now);
        assert!(village.start_training(&spearmen(&village, 1), now).is_ok());
        let before = village.queue(now + TimeDelta::seconds(60));
        assert_eq!(before.first().map(|j| j.status), Some(JobStatus::Training));
        let after = village.queue(now + TimeDelta::seconds(120));
        assert_eq!(after.first().map(|j| j.status), Some(JobStatus::Completed));
    }

    #[test]
    fn move_building_checks_bounds_and_occupancy() {
        let mut village = village_at(Utc::now());
        let barracks = barracks_id(&village);
        assert!(matches!(
            village.move_building(barracks, 40, 0, 40),
            Err(AuthorityError::Rejected { reason: RejectionReason::InvalidPosition, .. })
        ));
        assert!(matches!(
            village.move_building(barracks, 20, 20, 40),
            Err(AuthorityError::Rejected { reason: RejectionReason::InvalidPosition, .. })
        ));
        assert!(village.move_building(barracks, 5, 5, 40).is_ok());
        let moved = village.buildings().into_iter().find(|b| b.id == barracks);
        assert_eq!(moved.map(|b| (b.x, b.y)), Some((5, 5)));
    }

    #[test]
    fn town_hall_cannot_be_deleted() {
        let mut village = village_at(Utc::now());
        let hall = village
            .buildings()
            .iter()
            .find(|b| b.kind == BuildingKind::TownHall)
            .map(|b| b.id)
            .unwrap_or_default();
        assert!(matches!(
            village.delete_building(hall),
            Err(AuthorityError::Rejected { reason: RejectionReason::InvalidTarget, .. })
        ));
    }
}
