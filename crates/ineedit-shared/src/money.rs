//! Integer-cents arithmetic.
//!
//! Floating point never touches a balance. The only place a decimal value is
//! accepted is [`dollars_to_cents`], used when a listing price arrives in the
//! legacy decimal form.

/// Round a decimal dollar amount to whole cents (half away from zero).
pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

/// `percent`% of `cents`, rounded down.
pub fn percent_of(cents: i64, percent: u32) -> i64 {
    cents * i64::from(percent) / 100
}

/// Platform fee for a sale price, rounded half up to the nearest cent.
///
/// `platform_fee_cents(10_000, 900) == 900`
pub fn platform_fee_cents(price_cents: i64, fee_bps: u32) -> i64 {
    if price_cents <= 0 {
        return 0;
    }
    (price_cents * i64::from(fee_bps) + 5_000) / 10_000
}

/// What the seller receives when escrow is released:
/// `price - fee - shipping - tax`, floored at zero.
pub fn seller_net_cents(price_cents: i64, shipping_cents: i64, tax_cents: i64, fee_bps: u32) -> i64 {
    let fee = platform_fee_cents(price_cents, fee_bps);
    (price_cents - fee - shipping_cents - tax_cents).max(0)
}

/// Render cents as a dollar string for messages and logs.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rounds_half_up() {
        assert_eq!(platform_fee_cents(10_000, 900), 900);
        assert_eq!(platform_fee_cents(50, 900), 5); // 4.5 -> 5
        assert_eq!(platform_fee_cents(49, 900), 4); // 4.41 -> 4
        assert_eq!(platform_fee_cents(0, 900), 0);
    }

    #[test]
    fn seller_net_matches_delivery_example() {
        assert_eq!(seller_net_cents(10_000, 2_000, 0, 900), 7_100);
    }

    #[test]
    fn seller_net_is_floored_at_zero() {
        assert_eq!(seller_net_cents(1_000, 2_000, 0, 900), 0);
    }

    #[test]
    fn percent_of_rounds_down() {
        assert_eq!(percent_of(10_000, 60), 6_000);
        assert_eq!(percent_of(999, 90), 899);
    }

    #[test]
    fn dollars_convert_without_float_drift() {
        assert_eq!(dollars_to_cents(19.99), 1_999);
        assert_eq!(dollars_to_cents(0.29), 29);
    }

    #[test]
    fn formats_cents() {
        assert_eq!(format_cents(9_000), "$90.00");
        assert_eq!(format_cents(-5), "-$0.05");
    }
}
