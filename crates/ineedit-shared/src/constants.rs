/// Currency of the closed-loop wallet. Every amount in the system is an
/// integer count of its minor unit.
pub const CURRENCY: &str = "USD";

/// Platform fee withheld from the seller payout, in basis points (9%).
pub const DEFAULT_PLATFORM_FEE_BPS: u32 = 900;

/// Lowest buyer offer accepted, as a percentage of the list price.
pub const DEFAULT_OFFER_FLOOR_PERCENT: u32 = 60;

/// Each broadcast wave is capped at this percentage of the previous one.
pub const DEFAULT_BROADCAST_WAVE_PERCENT: u32 = 90;

/// Distinct broadcast price points allowed per listing.
pub const DEFAULT_MAX_BROADCAST_WAVES: u32 = 3;

/// Lifetime of a pending offer before the sweeper expires it.
pub const DEFAULT_OFFER_TTL_HOURS: i64 = 24;

/// The only region the shipping lookup currently resolves.
pub const DOMESTIC_SHIPPING_REGION: &str = "United States";

/// Expiry sweeper period (hourly).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum text message length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Listing price bounds ($1 .. $200,000).
pub const MIN_LISTING_PRICE_CENTS: i64 = 100;
pub const MAX_LISTING_PRICE_CENTS: i64 = 20_000_000;
