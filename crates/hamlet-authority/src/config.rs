//! Rules knobs for the authority.

use chrono::TimeDelta;

/// Tunable rules of the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    /// Lifetime of an issued session token.
    pub token_ttl: TimeDelta,
    /// How long after expiry a token may still be exchanged for a new one.
    pub refresh_grace: TimeDelta,
    /// Gaps at least this long are not credited as online production.
    pub online_gap_minutes: u64,
    /// Upper bound on a single offline claim (24 hours).
    pub max_offline_minutes: u64,
    /// Side length of the square building grid.
    pub grid_size: u32,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            token_ttl: TimeDelta::hours(1),
            refresh_grace: TimeDelta::hours(24),
            online_gap_minutes: 2,
            max_offline_minutes: 1440,
            grid_size: 40,
        }
    }
}
