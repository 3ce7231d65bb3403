//! Production math shared by the client's accrual preview and the authority.
//!
//! # Rules
//!
//! - Rates are non-negative `Decimal` units per minute, summed by kind over
//!   every generator building.
//! - Accrual is `floor(rate * elapsed_minutes)` per kind. Fractions are
//!   dropped, never carried, so repeated calls cannot drift.
//! - Elapsed time is counted in whole minutes and never goes negative.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::enums::ResourceKind;
use crate::structs::{Building, ResourceAmounts};

/// Milliseconds in one minute.
const MILLIS_PER_MINUTE: i64 = 60_000;

/// Per-kind production rates in units per minute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionRates {
    rates: BTreeMap<ResourceKind, Decimal>,
}

impl ProductionRates {
    /// No production at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, replacing any existing rate for `kind`.
    ///
    /// Negative rates are clamped to zero.
    #[must_use]
    pub fn with(mut self, kind: ResourceKind, rate: Decimal) -> Self {
        self.rates.insert(kind, rate.max(Decimal::ZERO));
        self
    }

    /// Add `rate` to the current rate for `kind`.
    ///
    /// Negative contributions are ignored; sums saturate at
    /// [`Decimal::MAX`].
    pub fn add(&mut self, kind: ResourceKind, rate: Decimal) {
        let rate = rate.max(Decimal::ZERO);
        let entry = self.rates.entry(kind).or_insert(Decimal::ZERO);
        *entry = entry.checked_add(rate).unwrap_or(Decimal::MAX);
    }

    /// Current rate for `kind` (zero if none).
    pub fn rate(&self, kind: ResourceKind) -> Decimal {
        self.rates.get(&kind).copied().unwrap_or(Decimal::ZERO)
    }

    /// Whether any kind has a positive rate.
    pub fn is_producing(&self) -> bool {
        self.rates.values().any(|r| *r > Decimal::ZERO)
    }

    /// Sum the production of every generator building.
    pub fn from_buildings<'a>(buildings: impl IntoIterator<Item = &'a Building>) -> Self {
        let mut rates = Self::new();
        for building in buildings {
            if let Some((kind, rate)) = building.kind.production(building.level) {
                rates.add(kind, rate);
            }
        }
        rates
    }
}

/// Compute whole-unit accrual for `elapsed_minutes` of production.
///
/// Each kind gets `floor(rate * elapsed_minutes)`. A product too large for
/// `u64` saturates at `u64::MAX`, which keeps the function monotonic.
pub fn compute_accrual(rates: &ProductionRates, elapsed_minutes: u64) -> ResourceAmounts {
    let minutes = Decimal::from(elapsed_minutes);
    let mut delta = ResourceAmounts::ZERO;
    for kind in ResourceKind::ALL {
        let produced = rates
            .rate(kind)
            .checked_mul(minutes)
            .map_or(u64::MAX, |total| total.floor().to_u64().unwrap_or(u64::MAX));
        delta.set(kind, produced);
    }
    delta
}

/// Whole minutes from `earlier` to `later`, clamped at zero.
///
/// A `later` that precedes `earlier` (clock skew) yields zero.
pub fn whole_minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    let millis = later.signed_duration_since(earlier).num_milliseconds();
    let minutes = millis.checked_div(MILLIS_PER_MINUTE).unwrap_or(0);
    u64::try_from(minutes.max(0)).unwrap_or(0)
}
