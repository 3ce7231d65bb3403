//! Enumeration types shared by the client engine and the authority.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A stockpiled resource kind.
///
/// Every kind is counted in whole units; there are no fractional resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Lumber from sawmills.
    Wood,
    /// Cut stone from quarries.
    Stone,
    /// Grain from farms.
    Food,
    /// Ore from iron mines.
    Iron,
}

impl ResourceKind {
    /// All resource kinds in display order.
    pub const ALL: [Self; 4] = [Self::Wood, Self::Stone, Self::Food, Self::Iron];
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Wood => "wood",
            Self::Stone => "stone",
            Self::Food => "food",
            Self::Iron => "iron",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Troops and buildings
// ---------------------------------------------------------------------------

/// A kind of unit that can be trained at a barracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum TroopKind {
    /// Cheap melee infantry.
    Spearman,
    /// Ranged infantry.
    Archer,
    /// Mounted unit, needs a level 2 barracks.
    Cavalry,
    /// Siege engine, needs a level 3 barracks.
    Catapult,
}

impl TroopKind {
    /// All troop kinds.
    pub const ALL: [Self; 4] = [Self::Spearman, Self::Archer, Self::Cavalry, Self::Catapult];
}

/// A kind of building that can stand in a village.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    /// Village centre. Provides housing and cannot be removed.
    TownHall,
    /// Provides housing.
    House,
    /// Produces food.
    Farm,
    /// Produces wood.
    Sawmill,
    /// Produces stone.
    Quarry,
    /// Produces iron.
    IronMine,
    /// Trains troops.
    Barracks,
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Server-side status of a training job.
///
/// Only the authority flips a job to [`JobStatus::Completed`]; the client
/// never sets it locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Units are still in training.
    Training,
    /// Training time has elapsed; the units await collection.
    Completed,
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Business-rule reason for rejecting a mutating request.
///
/// Rejections are informational outcomes shown to the player. They are
/// never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The village cannot pay the cost.
    InsufficientResources,
    /// The target grid cell is out of bounds or occupied.
    InvalidPosition,
    /// The building level is too low for the request.
    LevelRequirement,
    /// Quantity must be at least one.
    InvalidQuantity,
    /// Not enough housing for the requested units.
    PopulationCap,
    /// The training job has not finished yet.
    StillTraining,
    /// The referenced building, user or job does not exist.
    NotFound,
    /// The target cannot be used for this action.
    InvalidTarget,
}

impl core::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Self::InsufficientResources => "insufficient resources",
            Self::InvalidPosition => "invalid position",
            Self::LevelRequirement => "building level too low",
            Self::InvalidQuantity => "invalid quantity",
            Self::PopulationCap => "not enough housing",
            Self::StillTraining => "still training",
            Self::NotFound => "not found",
            Self::InvalidTarget => "invalid target",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ResourceKind::Iron).unwrap_or_default();
        assert_eq!(json, "\"iron\"");
        let json = serde_json::to_string(&BuildingKind::IronMine).unwrap_or_default();
        assert_eq!(json, "\"iron_mine\"");
    }

    #[test]
    fn rejection_display_is_human_readable() {
        assert_eq!(
            RejectionReason::InsufficientResources.to_string(),
            "insufficient resources"
        );
    }
}
