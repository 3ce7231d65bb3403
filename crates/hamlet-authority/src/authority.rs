//! The authoritative store: villages, credentials, and the request entry
//! points both gateways call into.
//!
//! Every entry point takes `now` explicitly and settles online production
//! before reading or mutating, so callers drive time through a
//! [`Clock`](hamlet_types::Clock) of their choosing.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use hamlet_types::{
    Building, BuildingId, CompletionReceipt, DonationRequest, JobId, MoveBuildingRequest,
    Population, RejectionReason, ResourceAmounts, ResourceLedger, SessionCredential,
    StartTrainingRequest, TrainingJob, TrainingReceipt, UnitTotals, UserId, VillageSeed,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AuthorityConfig;
use crate::error::AuthorityError;
use crate::village::Village;

/// Who a token belongs to and until when.
#[derive(Debug, Clone, Copy)]
struct Grant {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// In-memory authoritative backend.
#[derive(Debug, Default)]
pub struct Authority {
    config: AuthorityConfig,
    villages: BTreeMap<UserId, Village>,
    grants: HashMap<String, Grant>,
}

impl Authority {
    /// Create an empty authority.
    pub fn new(config: AuthorityConfig) -> Self {
        Self {
            config,
            villages: BTreeMap::new(),
            grants: HashMap::new(),
        }
    }

    /// Active rules.
    pub const fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Villages and credentials
    // -----------------------------------------------------------------------

    /// Found a new village for a new player and issue their first credential.
    pub fn seed_village(&mut self, now: DateTime<Utc>) -> Result<VillageSeed, AuthorityError> {
        let user_id = UserId::new();
        let village = Village::found(user_id, now);
        let buildings = village.buildings();
        self.villages.insert(user_id, village);
        let credential = self.issue_credential(user_id, now)?;
        info!(user_id = %user_id, "village seeded");
        Ok(VillageSeed {
            user_id,
            credential,
            buildings,
        })
    }

    /// Borrow a village for inspection.
    pub fn village(&self, user_id: UserId) -> Option<&Village> {
        self.villages.get(&user_id)
    }

    /// Borrow a village for scenario setup.
    pub fn village_mut(&mut self, user_id: UserId) -> Option<&mut Village> {
        self.villages.get_mut(&user_id)
    }

    /// Issue a fresh token for `user_id`.
    pub fn issue_credential(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<SessionCredential, AuthorityError> {
        let expires_at = now
            .checked_add_signed(self.config.token_ttl)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        let token = Uuid::new_v4().simple().to_string();
        self.grants.insert(
            token.clone(),
            Grant {
                user_id,
                expires_at,
            },
        );
        Ok(SessionCredential { token, expires_at })
    }

    /// Resolve a bearer token to its owner.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Unauthorized`] for an unknown or expired
    /// token.
    pub fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<UserId, AuthorityError> {
        let grant = self
            .grants
            .get(token)
            .ok_or_else(|| AuthorityError::Unauthorized(String::from("unknown token")))?;
        if now >= grant.expires_at {
            return Err(AuthorityError::Unauthorized(String::from("token expired")));
        }
        Ok(grant.user_id)
    }

    /// Exchange `token` for a new credential. The old token is revoked.
    ///
    /// Expired tokens may still be exchanged within the refresh grace
    /// period.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Unauthorized`] if the token is unknown or
    /// past its grace period.
    pub fn refresh(
        &mut self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionCredential, AuthorityError> {
        let grant = *self
            .grants
            .get(token)
            .ok_or_else(|| AuthorityError::Unauthorized(String::from("unknown token")))?;
        let deadline = grant
            .expires_at
            .checked_add_signed(self.config.refresh_grace)
            .ok_or(AuthorityError::ArithmeticOverflow)?;
        if now >= deadline {
            self.grants.remove(token);
            return Err(AuthorityError::Unauthorized(String::from(
                "token past refresh grace",
            )));
        }
        self.grants.remove(token);
        let credential = self.issue_credential(grant.user_id, now)?;
        debug!(user_id = %grant.user_id, expires_at = %credential.expires_at, "credential refreshed");
        Ok(credential)
    }

    /// Revoke a token immediately.
    pub fn revoke(&mut self, token: &str) {
        self.grants.remove(token);
    }

    /// Settle production and borrow the caller's village mutably.
    fn settled(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<&mut Village, AuthorityError> {
        let gap = self.config.online_gap_minutes;
        let village = self
            .villages
            .get_mut(&user_id)
            .ok_or(AuthorityError::UnknownUser(user_id))?;
        village.settle(now, gap)?;
        Ok(village)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current ledger.
    pub fn ledger(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ResourceLedger, AuthorityError> {
        Ok(self.settled(user_id, now)?.ledger(now))
    }

    /// Current population figures.
    pub fn population(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Population, AuthorityError> {
        Ok(self.settled(user_id, now)?.population_snapshot())
    }

    /// Current buildings.
    pub fn buildings(&self, user_id: UserId) -> Result<Vec<Building>, AuthorityError> {
        self.villages
            .get(&user_id)
            .map(Village::buildings)
            .ok_or(AuthorityError::UnknownUser(user_id))
    }

    /// Current unit totals.
    pub fn units(&self, user_id: UserId) -> Result<UnitTotals, AuthorityError> {
        self.villages
            .get(&user_id)
            .map(Village::units)
            .ok_or(AuthorityError::UnknownUser(user_id))
    }

    /// Training queue with statuses derived at `now`.
    pub fn training_queue(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrainingJob>, AuthorityError> {
        Ok(self.settled(user_id, now)?.queue(now))
    }

    // -----------------------------------------------------------------------
    // Offline accrual
    // -----------------------------------------------------------------------

    /// What claiming `elapsed_minutes` would credit.
    pub fn preview_offline(
        &mut self,
        user_id: UserId,
        elapsed_minutes: u64,
        now: DateTime<Utc>,
    ) -> Result<ResourceAmounts, AuthorityError> {
        let cap = self.config.max_offline_minutes;
        Ok(self
            .settled(user_id, now)?
            .preview_offline(elapsed_minutes, now, cap))
    }

    /// Credit offline production and return the new ledger.
    pub fn claim_offline(
        &mut self,
        user_id: UserId,
        elapsed_minutes: u64,
        now: DateTime<Utc>,
    ) -> Result<ResourceLedger, AuthorityError> {
        let cap = self.config.max_offline_minutes;
        let village = self.settled(user_id, now)?;
        let credited = village.claim_offline(elapsed_minutes, now, cap)?;
        info!(
            user_id = %user_id,
            elapsed_minutes,
            credited_total = credited.total(),
            "offline accrual claimed"
        );
        Ok(village.ledger(now))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Queue a training batch.
    pub fn start_training(
        &mut self,
        user_id: UserId,
        request: &StartTrainingRequest,
        now: DateTime<Utc>,
    ) -> Result<TrainingReceipt, AuthorityError> {
        let receipt = self.settled(user_id, now)?.start_training(request, now)?;
        debug!(
            user_id = %user_id,
            job_id = %receipt.job.id,
            troop_kind = ?request.troop_kind,
            quantity = request.quantity,
            ends_at = %receipt.job.ends_at,
            "training started"
        );
        Ok(receipt)
    }

    /// Collect a finished training job.
    pub fn complete_training(
        &mut self,
        user_id: UserId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<CompletionReceipt, AuthorityError> {
        self.settled(user_id, now)?.complete_training(job_id, now)
    }

    /// Move resources from the caller to another player.
    pub fn donate(
        &mut self,
        user_id: UserId,
        request: &DonationRequest,
        now: DateTime<Utc>,
    ) -> Result<ResourceLedger, AuthorityError> {
        if request.recipient == user_id {
            return Err(AuthorityError::rejected(
                RejectionReason::InvalidTarget,
                "cannot donate to yourself",
            ));
        }
        if !self.villages.contains_key(&request.recipient) {
            return Err(AuthorityError::rejected(
                RejectionReason::NotFound,
                format!("no village for user {}", request.recipient),
            ));
        }
        self.settled(request.recipient, now)?;
        self.settled(user_id, now)?.debit(&request.amounts)?;
        if let Err(err) = self.settled(request.recipient, now)?.credit(&request.amounts) {
            // Give the donor their resources back before reporting.
            self.settled(user_id, now)?.credit(&request.amounts)?;
            return Err(err);
        }
        info!(
            donor = %user_id,
            recipient = %request.recipient,
            total = request.amounts.total(),
            "donation transferred"
        );
        self.ledger(user_id, now)
    }

    /// Move a building.
    pub fn move_building(
        &mut self,
        user_id: UserId,
        building_id: BuildingId,
        request: MoveBuildingRequest,
        now: DateTime<Utc>,
    ) -> Result<ResourceLedger, AuthorityError> {
        let grid = self.config.grid_size;
        let village = self.settled(user_id, now)?;
        village.move_building(building_id, request.x, request.y, grid)?;
        Ok(village.ledger(now))
    }

    /// Remove a building.
    pub fn delete_building(
        &mut self,
        user_id: UserId,
        building_id: BuildingId,
        now: DateTime<Utc>,
    ) -> Result<ResourceLedger, AuthorityError> {
        let village = self.settled(user_id, now)?;
        village.delete_building(building_id)?;
        Ok(village.ledger(now))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use hamlet_types::{BuildingKind, TroopKind};

    use super::*;

    fn seeded() -> (Authority, VillageSeed, DateTime<Utc>) {
        let now = Utc::now();
        let mut authority = Authority::new(AuthorityConfig::default());
        let seed = authority.seed_village(now);
        assert!(seed.is_ok());
        let seed = seed.unwrap_or_else(|_| VillageSeed {
            user_id: UserId::new(),
            credential: SessionCredential {
                token: String::new(),
                expires_at: now,
            },
            buildings: Vec::new(),
        });
        (authority, seed, now)
    }

    #[test]
    fn seeded_token_authenticates_until_expiry() {
        let (authority, seed, now) = seeded();
        let token = seed.credential.token.as_str();
        assert_eq!(authority.authenticate(token, now).ok(), Some(seed.user_id));
        let later = now + TimeDelta::hours(1);
        assert!(matches!(
            authority.authenticate(token, later),
            Err(AuthorityError::Unauthorized(_))
        ));
    }

    #[test]
    fn refresh_revokes_the_old_token() {
        let (mut authority, seed, now) = seeded();
        let old = seed.credential.token;
        let fresh = authority.refresh(&old, now);
        assert!(fresh.is_ok());
        let fresh = fresh.map(|c| c.token).unwrap_or_default();
        assert_ne!(fresh, old);
        assert!(authority.authenticate(&old, now).is_err());
        assert_eq!(authority.authenticate(&fresh, now).ok(), Some(seed.user_id));
        assert!(authority.refresh(&old, now).is_err());
    }

    #[test]
    fn expired_token_refreshes_within_grace() {
        let (mut authority, seed, now) = seeded();
        let later = now + TimeDelta::hours(2);
        assert!(authority.refresh(&seed.credential.token, later).is_ok());
    }

    #[test]
    fn donation_moves_resources_between_villages() {
        let (mut authority, donor, now) = seeded();
        let recipient = authority.seed_village(now).map(|s| s.user_id).unwrap_or_default();
        let request = DonationRequest {
            recipient,
            amounts: ResourceAmounts::new(100, 0, 0, 0),
        };
        let ledger = authority.donate(donor.user_id, &request, now);
        assert_eq!(ledger.map(|l| l.resources.wood).ok(), Some(400));
        let theirs = authority.ledger(recipient, now);
        assert_eq!(theirs.map(|l| l.resources.wood).ok(), Some(600));
    }

    #[test]
    fn donation_to_unknown_player_is_rejected() {
        let (mut authority, donor, now) = seeded();
        let request = DonationRequest {
            recipient: UserId::new(),
            amounts: ResourceAmounts::new(1, 0, 0, 0),
        };
        assert!(matches!(
            authority.donate(donor.user_id, &request, now),
            Err(AuthorityError::Rejected { reason: RejectionReason::NotFound, .. })
        ));
    }

    #[test]
    fn training_round_trip_through_the_store() {
        let (mut authority, seed, now) = seeded();
        let barracks = seed
            .buildings
            .iter()
            .find(|b| b.kind == BuildingKind::Barracks)
            .map(|b| b.id)
            .unwrap_or_default();
        let request = StartTrainingRequest {
            troop_kind: TroopKind::Archer,
            building_id: barracks,
            quantity: 1,
        };
        let job = authority
            .start_training(seed.user_id, &request, now)
            .map(|r| r.job.id)
            .unwrap_or_default();
        let done = now + TimeDelta::minutes(3);
        let receipt = authority.complete_training(seed.user_id, job, done);
        assert_eq!(receipt.map(|r| r.units.get(TroopKind::Archer)).ok(), Some(1));
        assert_eq!(
            authority.units(seed.user_id).map(|u| u.get(TroopKind::Archer)).ok(),
            Some(1)
        );
    }
}
