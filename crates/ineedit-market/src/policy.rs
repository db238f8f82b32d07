//! Tunable marketplace rules.

use chrono::{DateTime, Duration, Utc};

use ineedit_shared::constants::{
    DEFAULT_BROADCAST_WAVE_PERCENT, DEFAULT_MAX_BROADCAST_WAVES, DEFAULT_OFFER_FLOOR_PERCENT,
    DEFAULT_OFFER_TTL_HOURS, DEFAULT_PLATFORM_FEE_BPS,
};
use ineedit_shared::money::percent_of;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketPolicy {
    /// Platform fee in basis points of the sale price.
    pub platform_fee_bps: u32,
    /// Lowest buyer offer, as a percentage of list price.
    pub offer_floor_percent: u32,
    /// Lifetime of a new offer in hours. `0` means offers never expire.
    pub offer_ttl_hours: i64,
    /// Each broadcast wave is capped at this percentage of the previous one.
    pub broadcast_wave_percent: u32,
    /// Distinct broadcast prices allowed per listing.
    pub max_broadcast_waves: u32,
}

impl Default for MarketPolicy {
    fn default() -> Self {
        Self {
            platform_fee_bps: DEFAULT_PLATFORM_FEE_BPS,
            offer_floor_percent: DEFAULT_OFFER_FLOOR_PERCENT,
            offer_ttl_hours: DEFAULT_OFFER_TTL_HOURS,
            broadcast_wave_percent: DEFAULT_BROADCAST_WAVE_PERCENT,
            max_broadcast_waves: DEFAULT_MAX_BROADCAST_WAVES,
        }
    }
}

impl MarketPolicy {
    pub fn offer_floor_cents(&self, list_price_cents: i64) -> i64 {
        percent_of(list_price_cents, self.offer_floor_percent)
    }

    /// Deadline for an offer created at `now`.
    pub fn offer_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.offer_ttl_hours > 0).then(|| now + Duration::hours(self.offer_ttl_hours))
    }

    /// Highest price the next broadcast wave may use, given the distinct
    /// prices of the waves already sent. The cap steps down from the lowest
    /// of them. `None` once every wave is spent.
    pub fn next_wave_cap(&self, list_price_cents: i64, previous_waves: &[i64]) -> Option<i64> {
        if previous_waves.len() >= self.max_broadcast_waves as usize {
            return None;
        }
        let base = previous_waves.iter().copied().min().unwrap_or(list_price_cents);
        Some(percent_of(base, self.broadcast_wave_percent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waves_step_down_from_list_price() {
        let policy = MarketPolicy::default();
        assert_eq!(policy.next_wave_cap(10_000, &[]), Some(9_000));
        assert_eq!(policy.next_wave_cap(10_000, &[9_000]), Some(8_100));
        assert_eq!(policy.next_wave_cap(10_000, &[8_500, 7_000]), Some(6_300));
        assert_eq!(policy.next_wave_cap(10_000, &[8_100, 9_000]), Some(7_290));
        assert_eq!(policy.next_wave_cap(10_000, &[9_000, 8_100, 7_290]), None);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let policy = MarketPolicy {
            offer_ttl_hours: 0,
            ..MarketPolicy::default()
        };
        assert_eq!(policy.offer_deadline(Utc::now()), None);
    }

    #[test]
    fn floor_is_sixty_percent_by_default() {
        assert_eq!(MarketPolicy::default().offer_floor_cents(10_000), 6_000);
    }
}
