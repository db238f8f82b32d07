//! Deterministic fixtures for the unit tests.

use std::sync::Arc;

use tempfile::TempDir;

use ineedit_shared::constants::DOMESTIC_SHIPPING_REGION;
use ineedit_shared::{AccountId, ShippingAddress};
use ineedit_store::{Listing, ShippingOption};

use crate::accounts::NewAccount;
use crate::clock::ManualClock;
use crate::ids::SequentialIds;
use crate::listings::NewListing;
use crate::market::Market;
use crate::principal::Principal;
use crate::projector::RecordingProjector;

pub(crate) struct Harness {
    pub market: Market,
    pub clock: ManualClock,
    pub projector: Arc<RecordingProjector>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::default_start();
        let projector = Arc::new(RecordingProjector::new());
        let market = Market::new(dir.path().join("market.db"))
            .with_clock(Arc::new(clock.clone()))
            .with_ids(Arc::new(SequentialIds::new()))
            .with_projector(projector.clone());
        Self {
            market,
            clock,
            projector,
            _dir: dir,
        }
    }

    pub fn account(&self, balance_cents: i64) -> AccountId {
        self.market
            .create_account(NewAccount {
                display_name: "tester".into(),
                opening_balance_cents: balance_cents,
            })
            .unwrap()
            .id
    }

    pub fn principal(&self, id: &AccountId) -> Principal {
        self.market.principal(*id).unwrap()
    }

    pub fn balance(&self, id: &AccountId) -> i64 {
        self.principal(id).balance_cents
    }

    /// A published listing. `None` leaves only a non-domestic region enabled.
    pub fn listing(&self, seller: &AccountId, price_cents: i64, domestic_shipping: Option<i64>) -> Listing {
        self.market
            .create_listing(
                &self.principal(seller),
                Self::listing_request(price_cents, domestic_shipping),
            )
            .unwrap()
    }

    pub fn listing_request(price_cents: i64, domestic_shipping: Option<i64>) -> NewListing {
        NewListing {
            title: "Walnut side table".into(),
            description: "Solid wood, light wear.".into(),
            price_cents,
            thumbnail: Some("https://img.example/table.jpg".into()),
            is_draft: false,
            is_free_shipping: false,
            can_offer: true,
            shipping_options: vec![
                ShippingOption {
                    region: DOMESTIC_SHIPPING_REGION.into(),
                    cost_cents: domestic_shipping.unwrap_or(0),
                    enabled: domestic_shipping.is_some(),
                },
                ShippingOption {
                    region: "Canada".into(),
                    cost_cents: 1_500,
                    enabled: true,
                },
            ],
        }
    }
}

pub(crate) fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ada Buyer".into(),
        line1: "1 Main St".into(),
        line2: None,
        city: "Springfield".into(),
        state: "IL".into(),
        zip: "62701".into(),
        country: "US".into(),
        phone: None,
    }
}
