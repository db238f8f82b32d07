//! Periodic offer expiry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use ineedit_market::{Market, SweepReport};

/// Run one sweep on the blocking pool.
pub async fn sweep_once(market: Arc<Market>) -> Option<SweepReport> {
    match tokio::task::spawn_blocking(move || market.sweep_expired_offers()).await {
        Ok(Ok(report)) => Some(report),
        Ok(Err(e)) => {
            error!(error = %e, "Offer expiry sweep failed");
            None
        }
        Err(e) => {
            error!(error = %e, "Offer expiry sweep panicked");
            None
        }
    }
}

/// Sweep every `period`, starting immediately.
pub fn spawn_sweeper(market: Arc<Market>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Some(report) = sweep_once(market.clone()).await {
                debug!(?report, "Sweep tick");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ineedit_market::{CreateOffer, ManualClock, NewAccount, NewListing};
    use ineedit_shared::ShippingAddress;
    use ineedit_store::ShippingOption;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweep_releases_overdue_offer() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let market = Arc::new(Market::new(dir.path().join("sweep.db")).with_clock(clock.clone()));

        let seller = market
            .create_account(NewAccount { display_name: "seller".into(), opening_balance_cents: 0 })
            .unwrap();
        let buyer = market
            .create_account(NewAccount { display_name: "buyer".into(), opening_balance_cents: 20_000 })
            .unwrap();
        let listing = market
            .create_listing(
                &market.principal(seller.id).unwrap(),
                NewListing {
                    title: "Desk".into(),
                    description: String::new(),
                    price_cents: 10_000,
                    thumbnail: None,
                    is_draft: false,
                    is_free_shipping: true,
                    can_offer: true,
                    shipping_options: vec![ShippingOption {
                        region: "United States".into(),
                        cost_cents: 0,
                        enabled: true,
                    }],
                },
            )
            .unwrap();
        market
            .create_offer(
                &market.principal(buyer.id).unwrap(),
                CreateOffer {
                    listing_id: listing.id,
                    amount_cents: 8_000,
                    tax_cents: 0,
                    shipping_address: ShippingAddress {
                        full_name: "Bo".into(),
                        line1: "2 Elm St".into(),
                        line2: None,
                        city: "Austin".into(),
                        state: "TX".into(),
                        zip: "73301".into(),
                        country: "US".into(),
                        phone: None,
                    },
                },
            )
            .unwrap();

        let report = sweep_once(market.clone()).await.unwrap();
        assert_eq!(report.expired, 0);

        clock.advance(chrono::Duration::hours(25));
        let report = sweep_once(market.clone()).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.released_cents, 8_000);
        assert_eq!(market.principal(buyer.id).unwrap().balance_cents, 20_000);
    }
}
