//! Static game data: troop costs and training times, building production
//! and housing.
//!
//! Both the client (for its advisory affordability guard) and the authority
//! read from this table, so the two never disagree about what a troop costs.

use rust_decimal::Decimal;

use crate::enums::{BuildingKind, ResourceKind, TroopKind};
use crate::structs::ResourceAmounts;

/// Cost and timing for one troop kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TroopProfile {
    /// Cost of a single unit.
    pub unit_cost: ResourceAmounts,
    /// Training minutes per unit.
    pub minutes_per_unit: u32,
    /// Minimum barracks level.
    pub barracks_level: u32,
    /// Housing consumed per unit.
    pub housing: u32,
}

impl TroopKind {
    /// Catalog entry for this troop kind.
    pub const fn profile(self) -> TroopProfile {
        match self {
            Self::Spearman => TroopProfile {
                unit_cost: ResourceAmounts::new(50, 0, 30, 10),
                minutes_per_unit: 2,
                barracks_level: 1,
                housing: 1,
            },
            Self::Archer => TroopProfile {
                unit_cost: ResourceAmounts::new(80, 0, 40, 20),
                minutes_per_unit: 3,
                barracks_level: 1,
                housing: 1,
            },
            Self::Cavalry => TroopProfile {
                unit_cost: ResourceAmounts::new(60, 0, 120, 80),
                minutes_per_unit: 6,
                barracks_level: 2,
                housing: 2,
            },
            Self::Catapult => TroopProfile {
                unit_cost: ResourceAmounts::new(300, 200, 0, 150),
                minutes_per_unit: 12,
                barracks_level: 3,
                housing: 4,
            },
        }
    }

    /// Total cost of a batch, or `None` on overflow.
    pub fn batch_cost(self, quantity: u32) -> Option<ResourceAmounts> {
        self.profile().unit_cost.checked_scale(u64::from(quantity))
    }

    /// Total training minutes for a batch, or `None` on overflow.
    pub fn batch_minutes(self, quantity: u32) -> Option<u32> {
        self.profile().minutes_per_unit.checked_mul(quantity)
    }

    /// Total housing for a batch, or `None` on overflow.
    pub fn batch_housing(self, quantity: u32) -> Option<u32> {
        self.profile().housing.checked_mul(quantity)
    }
}

impl BuildingKind {
    /// Resource kind and per-minute rate produced at `level`, if this is a
    /// generator building.
    ///
    /// Rates scale linearly with level.
    pub fn production(self, level: u32) -> Option<(ResourceKind, Decimal)> {
        let (kind, base) = match self {
            Self::Sawmill => (ResourceKind::Wood, Decimal::from(5)),
            Self::Quarry => (ResourceKind::Stone, Decimal::from(3)),
            Self::Farm => (ResourceKind::Food, Decimal::from(4)),
            Self::IronMine => (ResourceKind::Iron, Decimal::from(2)),
            Self::TownHall | Self::House | Self::Barracks => return None,
        };
        let rate = base.checked_mul(Decimal::from(level))?;
        Some((kind, rate))
    }

    /// Housing provided at `level`.
    pub const fn housing(self, level: u32) -> u32 {
        match self {
            Self::TownHall => 20_u32.saturating_mul(level),
            Self::House => 10_u32.saturating_mul(level),
            Self::Farm
            | Self::Sawmill
            | Self::Quarry
            | Self::IronMine
            | Self::Barracks => 0,
        }
    }

    /// Whether this building can be removed from a village.
    pub const fn is_removable(self) -> bool {
        !matches!(self, Self::TownHall)
    }
}
