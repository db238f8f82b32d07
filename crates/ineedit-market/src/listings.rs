//! Listing lifecycle: create, publish, price drop, soft delete, favorites.
//!
//! Every availability change is pushed to the search projector after its
//! transaction commits.

use serde::{Deserialize, Serialize};
use tracing::info;

use ineedit_shared::constants::{MAX_LISTING_PRICE_CENTS, MIN_LISTING_PRICE_CENTS};
use ineedit_shared::{ArchiveReason, ListingId};
use ineedit_store::{listings, Listing, ShippingOption};

use crate::error::{MarketError, OrNotFound, Result};
use crate::market::Market;
use crate::offers::close_listing;
use crate::principal::Principal;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_free_shipping: bool,
    #[serde(default = "default_true")]
    pub can_offer: bool,
    pub shipping_options: Vec<ShippingOption>,
}

impl NewListing {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(MarketError::InvalidRequest("title is required".into()));
        }
        check_price(self.price_cents)?;
        if !self.shipping_options.iter().any(|o| o.enabled) {
            return Err(MarketError::InvalidRequest(
                "at least one shipping region must be enabled".into(),
            ));
        }
        if self.shipping_options.iter().any(|o| o.cost_cents < 0) {
            return Err(MarketError::InvalidAmount("shipping cost cannot be negative".into()));
        }
        Ok(())
    }
}

fn check_price(price_cents: i64) -> Result<()> {
    if !(MIN_LISTING_PRICE_CENTS..=MAX_LISTING_PRICE_CENTS).contains(&price_cents) {
        return Err(MarketError::InvalidAmount(format!(
            "price must be between {MIN_LISTING_PRICE_CENTS} and {MAX_LISTING_PRICE_CENTS} cents"
        )));
    }
    Ok(())
}

fn owned_by(listing: &Listing, principal: &Principal) -> Result<()> {
    if listing.seller_id != principal.account_id {
        return Err(MarketError::Forbidden("only the seller can change this listing"));
    }
    Ok(())
}

impl Market {
    pub fn create_listing(&self, principal: &Principal, req: NewListing) -> Result<Listing> {
        req.validate()?;
        let now = self.now();
        let listing = Listing {
            id: self.ids.listing_id(),
            seller_id: principal.account_id,
            title: req.title.trim().to_string(),
            description: req.description,
            price_cents: req.price_cents,
            original_price_cents: None,
            thumbnail: req.thumbnail,
            buyer_id: None,
            is_sold: false,
            is_deleted: false,
            is_draft: req.is_draft,
            is_free_shipping: req.is_free_shipping,
            can_offer: req.can_offer,
            shipping_options: req.shipping_options,
            created_at: now,
            updated_at: now,
        };
        self.write("create_listing", |tx| Ok(listings::insert(tx, &listing)?))?;

        info!(
            listing_id = %listing.id,
            seller_id = %listing.seller_id,
            price_cents = listing.price_cents,
            draft = listing.is_draft,
            "listing created"
        );
        self.project(&listing);
        Ok(listing)
    }

    pub fn get_listing(&self, id: ListingId) -> Result<Listing> {
        let db = self.open()?;
        listings::get(db.conn(), id).or_not_found("listing")
    }

    pub fn publish_listing(&self, principal: &Principal, id: ListingId) -> Result<Listing> {
        let now = self.now();
        let listing = self.write("publish_listing", |tx| {
            let listing = listings::get(tx, id).or_not_found("listing")?;
            owned_by(&listing, principal)?;
            if !listings::publish(tx, id, now)? {
                return Err(MarketError::InvalidRequest("listing is not an unpublished draft".into()));
            }
            Ok(listings::get(tx, id)?)
        })?;

        info!(listing_id = %id, "listing published");
        self.project(&listing);
        Ok(listing)
    }

    /// Lower the asking price. The new price must be strictly below the
    /// current one.
    pub fn drop_price(&self, principal: &Principal, id: ListingId, new_price_cents: i64) -> Result<Listing> {
        check_price(new_price_cents)?;
        let now = self.now();
        let listing = self.write("drop_price", |tx| {
            let listing = listings::get(tx, id).or_not_found("listing")?;
            owned_by(&listing, principal)?;
            if !listing.is_available() {
                return Err(MarketError::ListingUnavailable);
            }
            if new_price_cents >= listing.price_cents {
                return Err(MarketError::InvalidAmount(format!(
                    "new price must be below the current {} cents",
                    listing.price_cents
                )));
            }
            if !listings::drop_price(tx, id, new_price_cents, now)? {
                return Err(MarketError::ListingUnavailable);
            }
            Ok(listings::get(tx, id)?)
        })?;

        info!(
            listing_id = %id,
            price_cents = listing.price_cents,
            original_price_cents = ?listing.original_price_cents,
            "price dropped"
        );
        self.project(&listing);
        Ok(listing)
    }

    /// Soft-delete an unsold listing, declining its pending offers and
    /// archiving its threads.
    pub fn delete_listing(&self, principal: &Principal, id: ListingId) -> Result<Listing> {
        let now = self.now();
        let (listing, declined) = self.write("delete_listing", |tx| {
            let listing = listings::get(tx, id).or_not_found("listing")?;
            owned_by(&listing, principal)?;
            if listing.is_sold {
                return Err(MarketError::AlreadySold);
            }
            if !listings::soft_delete(tx, id, now)? {
                return Err(MarketError::ListingUnavailable);
            }
            let declined = close_listing(
                tx,
                self.ids.as_ref(),
                id,
                None,
                ArchiveReason::ListingDeleted,
                now,
            )?;
            Ok((listings::get(tx, id)?, declined))
        })?;

        info!(listing_id = %id, declined_offers = declined, "listing deleted");
        self.project(&listing);
        Ok(listing)
    }

    /// Returns `true` if the favorite is new.
    pub fn favorite(&self, principal: &Principal, id: ListingId) -> Result<bool> {
        let now = self.now();
        self.write("favorite", |tx| {
            let listing = listings::get(tx, id).or_not_found("listing")?;
            if listing.seller_id == principal.account_id {
                return Err(MarketError::InvalidRequest("cannot favorite your own listing".into()));
            }
            Ok(listings::add_favorite(tx, principal.account_id, id, now)?)
        })
    }

    /// Returns `true` if a favorite was removed.
    pub fn unfavorite(&self, principal: &Principal, id: ListingId) -> Result<bool> {
        self.write("unfavorite", |tx| {
            Ok(listings::remove_favorite(tx, principal.account_id, id)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[test]
    fn draft_is_removed_from_index_until_published() {
        let h = Harness::new();
        let seller = h.account(0);
        let sp = h.principal(&seller);
        let mut req = Harness::listing_request(10_000, Some(2_000));
        req.is_draft = true;
        let listing = h.market.create_listing(&sp, req).unwrap();
        assert!(!h.projector.last_for(listing.id).unwrap().should_index());

        h.market.publish_listing(&sp, listing.id).unwrap();
        assert!(h.projector.last_for(listing.id).unwrap().should_index());

        let err = h.market.publish_listing(&sp, listing.id).unwrap_err();
        assert!(matches!(err, MarketError::InvalidRequest(_)));
    }

    #[test]
    fn price_drop_must_go_down_and_remembers_original() {
        let h = Harness::new();
        let seller = h.account(0);
        let sp = h.principal(&seller);
        let listing = h.listing(&seller, 10_000, Some(2_000));

        let err = h.market.drop_price(&sp, listing.id, 10_000).unwrap_err();
        assert!(matches!(err, MarketError::InvalidAmount(_)));

        let dropped = h.market.drop_price(&sp, listing.id, 8_000).unwrap();
        let dropped_again = h.market.drop_price(&sp, listing.id, 7_000).unwrap();
        assert_eq!(dropped.original_price_cents, Some(10_000));
        assert_eq!(dropped_again.original_price_cents, Some(10_000));
        assert_eq!(h.projector.last_for(listing.id).unwrap().price_cents, 7_000);
    }

    #[test]
    fn only_the_seller_may_drop_price_or_delete() {
        let h = Harness::new();
        let seller = h.account(0);
        let other = h.account(0);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let op = h.principal(&other);

        assert!(matches!(
            h.market.drop_price(&op, listing.id, 5_000),
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            h.market.delete_listing(&op, listing.id),
            Err(MarketError::Forbidden(_))
        ));
    }

    #[test]
    fn listing_needs_an_enabled_region() {
        let h = Harness::new();
        let seller = h.account(0);
        let mut req = Harness::listing_request(10_000, Some(2_000));
        for option in &mut req.shipping_options {
            option.enabled = false;
        }
        let err = h.market.create_listing(&h.principal(&seller), req).unwrap_err();
        assert!(matches!(err, MarketError::InvalidRequest(_)));
    }

    #[test]
    fn favorites_are_idempotent() {
        let h = Harness::new();
        let seller = h.account(0);
        let fan = h.account(0);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let fp = h.principal(&fan);

        assert!(h.market.favorite(&fp, listing.id).unwrap());
        assert!(!h.market.favorite(&fp, listing.id).unwrap());
        assert!(h.market.unfavorite(&fp, listing.id).unwrap());
        assert!(!h.market.unfavorite(&fp, listing.id).unwrap());
    }
}
