//! Offer state machine: `pending -> {accepted, declined, expired}`.
//!
//! Buyer offers debit the buyer's full total at creation and carry
//! `funds_held` until they leave `pending`. Seller-initiated offers hold
//! nothing; the buyer pays when accepting. Leaving `pending` always goes
//! through [`offers::transition_from_pending`], whose `WHERE status =
//! 'pending'` guard lets exactly one of accept, decline or expire move money.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use ineedit_shared::constants::DOMESTIC_SHIPPING_REGION;
use ineedit_shared::{
    AccountId, ArchiveReason, FundingMethod, ListingId, OfferId, OfferMode, OfferStatus,
    ShippingAddress, SystemEvent,
};
use ineedit_store::{
    accounts, listings, offers, threads, Connection, Listing, MessageBody, Offer, OfferSnapshot,
    Order, Transaction,
};

use crate::conversation::{open_thread, post, refresh_offer_snapshot};
use crate::error::{MarketError, OrNotFound, Result};
use crate::ids::IdGenerator;
use crate::market::Market;
use crate::orders::{open_order, Sale};
use crate::principal::Principal;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOffer {
    pub listing_id: ListingId,
    pub amount_cents: i64,
    #[serde(default)]
    pub tax_cents: i64,
    pub shipping_address: ShippingAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrivateOffer {
    pub listing_id: ListingId,
    pub buyer_id: AccountId,
    pub amount_cents: i64,
    #[serde(default)]
    pub tax_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastOffer {
    pub listing_id: ListingId,
    pub amount_cents: i64,
    #[serde(default)]
    pub tax_cents: i64,
}

/// Acceptance details. Seller-initiated offers need both fields; buyer
/// offers already carry the buyer's address and funds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptOffer {
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default)]
    pub funding_method: Option<FundingMethod>,
}

// ---------------------------------------------------------------------------
// Transition helpers shared with listings, orders and the sweeper
// ---------------------------------------------------------------------------

/// Move a pending offer to `declined` or `expired`: restore held funds,
/// refresh its message snapshot and append the matching system event.
///
/// Returns `false`, having written nothing, if the offer already left
/// `pending`.
pub(crate) fn close_offer(
    conn: &Connection,
    ids: &dyn IdGenerator,
    offer: &Offer,
    to: OfferStatus,
    actor: Option<AccountId>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    debug_assert!(matches!(to, OfferStatus::Declined | OfferStatus::Expired));
    if !offers::transition_from_pending(conn, offer.id, to, offer.funds_held, now)? {
        return Ok(false);
    }
    if offer.funds_held {
        accounts::credit(conn, offer.buyer_id, offer.total_cents)?;
    }
    refresh_offer_snapshot(conn, offer.id, to)?;

    let event = match to {
        OfferStatus::Expired => SystemEvent::OfferExpired,
        _ => SystemEvent::OfferDeclined,
    };
    let thread = open_thread(conn, ids, offer.listing_id, offer.buyer_id, offer.seller_id, now)?;
    let body = MessageBody::System {
        event,
        order_id: None,
        data: json!({
            "offer_id": offer.id,
            "reason": reason,
            "released_cents": if offer.funds_held { offer.total_cents } else { 0 },
        }),
    };
    post(conn, ids, &thread, actor, body, now)?;
    Ok(true)
}

/// Expire `id` if it is still pending and past its deadline at `now`.
pub(crate) fn expire_one(
    conn: &Connection,
    ids: &dyn IdGenerator,
    id: OfferId,
    now: DateTime<Utc>,
) -> Result<Option<Offer>> {
    let offer = offers::get(conn, id).or_not_found("offer")?;
    if offer.status != OfferStatus::Pending || !offer.is_past_deadline(now) {
        return Ok(None);
    }
    if close_offer(conn, ids, &offer, OfferStatus::Expired, None, "deadline_passed", now)? {
        Ok(Some(offer))
    } else {
        Ok(None)
    }
}

/// Expire every overdue pending offer on `listing`.
fn expire_due_on(
    conn: &Connection,
    ids: &dyn IdGenerator,
    listing: ListingId,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut expired = 0;
    for offer in offers::due_for_expiry(conn, now, Some(listing))? {
        if close_offer(conn, ids, &offer, OfferStatus::Expired, None, "deadline_passed", now)? {
            expired += 1;
        }
    }
    Ok(expired)
}

/// Decline every pending offer on a listing that was just sold or deleted
/// and archive its threads, except the winning buyer's.
pub(crate) fn close_listing(
    conn: &Connection,
    ids: &dyn IdGenerator,
    listing: ListingId,
    winner: Option<AccountId>,
    reason: ArchiveReason,
    now: DateTime<Utc>,
) -> Result<usize> {
    let tag = match reason {
        ArchiveReason::SoldToOther => "listing_sold",
        ArchiveReason::ListingDeleted => "listing_deleted",
    };
    let mut declined = 0;
    for offer in offers::pending_for_listing(conn, listing)? {
        if close_offer(conn, ids, &offer, OfferStatus::Declined, None, tag, now)? {
            declined += 1;
        }
    }
    threads::archive_for_listing(conn, listing, winner, reason)?;
    Ok(declined)
}

/// Store a new offer and announce it in its thread.
fn publish_offer(
    conn: &Connection,
    ids: &dyn IdGenerator,
    offer: &Offer,
    listing: &Listing,
    sender: AccountId,
    now: DateTime<Utc>,
) -> Result<()> {
    offers::insert(conn, offer)?;
    let thread = open_thread(conn, ids, listing.id, offer.buyer_id, offer.seller_id, now)?;
    let body = MessageBody::Offer {
        snapshot: OfferSnapshot::of(offer, listing.price_cents),
    };
    post(conn, ids, &thread, Some(sender), body, now)?;
    Ok(())
}

pub(crate) fn shipping_for(listing: &Listing) -> Result<i64> {
    listing
        .shipping_cents_to(DOMESTIC_SHIPPING_REGION)
        .ok_or(MarketError::ShippingUnavailable)
}

fn check_amounts(amount_cents: i64, tax_cents: i64) -> Result<()> {
    if amount_cents <= 0 {
        return Err(MarketError::InvalidAmount("amount must be positive".into()));
    }
    if tax_cents < 0 {
        return Err(MarketError::InvalidAmount("tax cannot be negative".into()));
    }
    Ok(())
}

pub(crate) fn check_address(address: &ShippingAddress) -> Result<()> {
    match address.missing_field() {
        Some(field) => Err(MarketError::InvalidRequest(format!(
            "shipping address is missing {field}"
        ))),
        None => Ok(()),
    }
}

/// The party allowed to accept or decline: the seller for buyer offers,
/// the targeted buyer for seller-initiated ones.
fn responder(offer: &Offer) -> AccountId {
    if offer.mode.is_seller_initiated() {
        offer.buyer_id
    } else {
        offer.seller_id
    }
}

pub(crate) fn live_listing(conn: &Connection, id: ListingId) -> Result<Listing> {
    let listing = listings::get(conn, id).or_not_found("listing")?;
    if !listing.is_available() {
        return Err(MarketError::ListingUnavailable);
    }
    Ok(listing)
}

pub(crate) fn debit(conn: &Connection, principal: &Principal, buyer: AccountId, cents: i64) -> Result<()> {
    let trusted = principal.account_id != buyer || principal.can_afford(cents);
    if !trusted || !accounts::try_debit(conn, buyer, cents)? {
        return Err(MarketError::InsufficientFunds { needed_cents: cents });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl Market {
    /// Buyer-initiated offer. Debits the buyer's full total up front.
    pub fn create_offer(&self, principal: &Principal, req: CreateOffer) -> Result<Offer> {
        check_amounts(req.amount_cents, req.tax_cents)?;
        check_address(&req.shipping_address)?;
        let me = principal.account_id;
        let now = self.now();
        let ids = self.ids.as_ref();

        let offer = self.write("create_offer", |tx| {
            let listing = live_listing(tx, req.listing_id)?;
            if listing.seller_id == me {
                return Err(MarketError::Forbidden("cannot make offers on your own listing"));
            }
            if !listing.can_offer {
                return Err(MarketError::InvalidRequest("listing does not accept offers".into()));
            }
            let floor = self.policy().offer_floor_cents(listing.price_cents);
            if req.amount_cents < floor || req.amount_cents > listing.price_cents {
                return Err(MarketError::OutOfPriceBounds(format!(
                    "offer must be between {floor} and {} cents",
                    listing.price_cents
                )));
            }

            expire_due_on(tx, ids, listing.id, now)?;
            if offers::pending_exists_for_buyer(tx, listing.id, me, OfferMode::Buyer)? {
                return Err(MarketError::DuplicateOffer);
            }

            let shipping_cents = shipping_for(&listing)?;
            let total_cents = req.amount_cents + shipping_cents + req.tax_cents;
            debit(tx, principal, me, total_cents)?;

            let offer = Offer {
                id: ids.offer_id(),
                listing_id: listing.id,
                buyer_id: me,
                seller_id: listing.seller_id,
                mode: OfferMode::Buyer,
                amount_cents: req.amount_cents,
                shipping_cents,
                tax_cents: req.tax_cents,
                total_cents,
                shipping_address: Some(req.shipping_address.clone()),
                status: OfferStatus::Pending,
                funds_held: true,
                expires_at: self.policy().offer_deadline(now),
                responded_at: None,
                created_at: now,
            };
            publish_offer(tx, ids, &offer, &listing, me, now)?;
            Ok(offer)
        })?;

        info!(
            offer_id = %offer.id,
            listing_id = %offer.listing_id,
            buyer_id = %offer.buyer_id,
            amount_cents = offer.amount_cents,
            held_cents = offer.total_cents,
            "buyer offer created"
        );
        Ok(offer)
    }

    /// Seller-private offer to one buyer. Nothing is held until acceptance.
    pub fn create_private_offer(&self, principal: &Principal, req: CreatePrivateOffer) -> Result<Offer> {
        check_amounts(req.amount_cents, req.tax_cents)?;
        let me = principal.account_id;
        if req.buyer_id == me {
            return Err(MarketError::InvalidRequest("cannot send an offer to yourself".into()));
        }
        let now = self.now();
        let ids = self.ids.as_ref();

        let offer = self.write("create_private_offer", |tx| {
            let listing = live_listing(tx, req.listing_id)?;
            if listing.seller_id != me {
                return Err(MarketError::Forbidden("only the seller can send private offers"));
            }
            if !accounts::exists(tx, req.buyer_id)? {
                return Err(MarketError::NotFound("account"));
            }
            if req.amount_cents > listing.price_cents {
                return Err(MarketError::OutOfPriceBounds(format!(
                    "offer cannot exceed the list price of {} cents",
                    listing.price_cents
                )));
            }

            expire_due_on(tx, ids, listing.id, now)?;
            if offers::pending_exists_for_buyer(tx, listing.id, req.buyer_id, OfferMode::SellerPrivate)? {
                return Err(MarketError::DuplicateOffer);
            }

            let shipping_cents = shipping_for(&listing)?;
            let offer = seller_offer(
                ids.offer_id(),
                &listing,
                req.buyer_id,
                OfferMode::SellerPrivate,
                req.amount_cents,
                shipping_cents,
                req.tax_cents,
                self.policy().offer_deadline(now),
                now,
            );
            publish_offer(tx, ids, &offer, &listing, me, now)?;
            Ok(offer)
        })?;

        info!(
            offer_id = %offer.id,
            listing_id = %offer.listing_id,
            buyer_id = %offer.buyer_id,
            amount_cents = offer.amount_cents,
            "private offer sent"
        );
        Ok(offer)
    }

    /// Send one wave of a seller broadcast: one offer per user who favorited
    /// the listing, each wave priced below the last.
    pub fn broadcast_offer(&self, principal: &Principal, req: BroadcastOffer) -> Result<Vec<Offer>> {
        check_amounts(req.amount_cents, req.tax_cents)?;
        let me = principal.account_id;
        let now = self.now();
        let ids = self.ids.as_ref();

        let sent = self.write("broadcast_offer", |tx| {
            let listing = live_listing(tx, req.listing_id)?;
            if listing.seller_id != me {
                return Err(MarketError::Forbidden("only the seller can broadcast offers"));
            }

            expire_due_on(tx, ids, listing.id, now)?;
            if offers::pending_broadcast_exists(tx, listing.id, me)? {
                return Err(MarketError::DuplicateOffer);
            }

            let waves = offers::broadcast_price_points(tx, listing.id)?;
            let cap = self
                .policy()
                .next_wave_cap(listing.price_cents, &waves)
                .ok_or_else(|| {
                    MarketError::OutOfPriceBounds(format!(
                        "all {} broadcast waves have been used",
                        self.policy().max_broadcast_waves
                    ))
                })?;
            if req.amount_cents > cap {
                return Err(MarketError::OutOfPriceBounds(format!(
                    "wave {} is capped at {cap} cents",
                    waves.len() + 1
                )));
            }

            let recipients: Vec<AccountId> = listings::favoriters(tx, listing.id)?
                .into_iter()
                .filter(|id| *id != me)
                .collect();
            if recipients.is_empty() {
                return Err(MarketError::NoRecipients);
            }

            let shipping_cents = shipping_for(&listing)?;
            let deadline = self.policy().offer_deadline(now);
            let mut sent = Vec::with_capacity(recipients.len());
            for buyer in recipients {
                let offer = seller_offer(
                    ids.offer_id(),
                    &listing,
                    buyer,
                    OfferMode::SellerBroadcast,
                    req.amount_cents,
                    shipping_cents,
                    req.tax_cents,
                    deadline,
                    now,
                );
                publish_offer(tx, ids, &offer, &listing, me, now)?;
                sent.push(offer);
            }
            Ok(sent)
        })?;

        info!(
            listing_id = %req.listing_id,
            amount_cents = req.amount_cents,
            recipients = sent.len(),
            "broadcast wave sent"
        );
        Ok(sent)
    }

    /// Accept a pending offer, selling the listing and opening a PAID order.
    ///
    /// An offer found past its deadline is expired (and that expiry
    /// committed) before the call fails with [`MarketError::OfferExpired`].
    pub fn accept_offer(&self, principal: &Principal, id: OfferId, req: AcceptOffer) -> Result<Order> {
        if let Some(address) = &req.shipping_address {
            check_address(address)?;
        }
        let now = self.now();

        match self.write("accept_offer", |tx| self.accept_in(tx, principal, id, &req, now)) {
            Ok((order, listing)) => {
                info!(
                    offer_id = %id,
                    order_id = %order.id,
                    listing_id = %order.listing_id,
                    total_cents = order.total_cents,
                    "offer accepted; escrow held"
                );
                self.project(&listing);
                Ok(order)
            }
            Err(MarketError::OfferExpired) => {
                self.write("expire_offer", |tx| expire_one(tx, self.ids.as_ref(), id, now))?;
                info!(offer_id = %id, "offer expired at acceptance");
                Err(MarketError::OfferExpired)
            }
            Err(e) => Err(e),
        }
    }

    fn accept_in(
        &self,
        tx: &Transaction<'_>,
        principal: &Principal,
        id: OfferId,
        req: &AcceptOffer,
        now: DateTime<Utc>,
    ) -> Result<(Order, Listing)> {
        let ids = self.ids.as_ref();
        let offer = offers::get(tx, id).or_not_found("offer")?;
        if responder(&offer) != principal.account_id {
            return Err(MarketError::Forbidden("not the recipient of this offer"));
        }
        // Losing accepts report the sale, not the decline it caused.
        let listing = listings::get(tx, offer.listing_id).or_not_found("listing")?;
        if listing.is_sold {
            return Err(MarketError::AlreadySold);
        }
        if !listing.is_available() {
            return Err(MarketError::ListingUnavailable);
        }
        if offer.status != OfferStatus::Pending {
            return Err(MarketError::OfferNotPending);
        }
        if offer.is_past_deadline(now) {
            return Err(MarketError::OfferExpired);
        }

        let shipping_address = if offer.mode.is_seller_initiated() {
            let address = req.shipping_address.clone().ok_or_else(|| {
                MarketError::InvalidRequest("shipping_address is required".into())
            })?;
            match req.funding_method {
                Some(FundingMethod::Wallet) => {}
                None => {
                    return Err(MarketError::InvalidRequest("funding_method is required".into()))
                }
            }
            Some(address)
        } else {
            offer.shipping_address.clone()
        };

        if !offers::transition_from_pending(tx, offer.id, OfferStatus::Accepted, offer.funds_held, now)? {
            return Err(MarketError::OfferNotPending);
        }
        if offer.mode.is_seller_initiated() {
            if let Some(address) = &shipping_address {
                offers::set_shipping_address(tx, offer.id, address)?;
            }
            debit(tx, principal, offer.buyer_id, offer.total_cents)?;
        }
        if !listings::reserve_for_sale(tx, listing.id, offer.buyer_id, now)? {
            return Err(MarketError::ListingUnavailable);
        }
        refresh_offer_snapshot(tx, offer.id, OfferStatus::Accepted)?;

        let order = open_order(
            tx,
            ids,
            Sale {
                listing: &listing,
                buyer: offer.buyer_id,
                offer_id: Some(offer.id),
                item_price_cents: offer.amount_cents,
                shipping_cents: offer.shipping_cents,
                tax_cents: offer.tax_cents,
                shipping_address,
                actor: principal.account_id,
            },
            now,
        )?;
        let sold = listings::get(tx, listing.id)?;
        Ok((order, sold))
    }

    /// Decline a pending offer, returning any held funds to the buyer.
    pub fn decline_offer(&self, principal: &Principal, id: OfferId) -> Result<Offer> {
        let now = self.now();
        let offer = self.write("decline_offer", |tx| {
            let offer = offers::get(tx, id).or_not_found("offer")?;
            if responder(&offer) != principal.account_id {
                return Err(MarketError::Forbidden("not the recipient of this offer"));
            }
            let closed = close_offer(
                tx,
                self.ids.as_ref(),
                &offer,
                OfferStatus::Declined,
                Some(principal.account_id),
                "declined",
                now,
            )?;
            if !closed {
                return Err(MarketError::OfferNotPending);
            }
            Ok(offers::get(tx, id)?)
        })?;

        info!(offer_id = %id, mode = %offer.mode, "offer declined");
        Ok(offer)
    }

    /// Read an offer as its buyer or seller.
    pub fn get_offer(&self, principal: &Principal, id: OfferId) -> Result<Offer> {
        let db = self.open()?;
        let offer = offers::get(db.conn(), id).or_not_found("offer")?;
        if offer.buyer_id != principal.account_id && offer.seller_id != principal.account_id {
            return Err(MarketError::Forbidden("not a party to this offer"));
        }
        Ok(offer)
    }
}

#[allow(clippy::too_many_arguments)]
fn seller_offer(
    id: OfferId,
    listing: &Listing,
    buyer: AccountId,
    mode: OfferMode,
    amount_cents: i64,
    shipping_cents: i64,
    tax_cents: i64,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Offer {
    Offer {
        id,
        listing_id: listing.id,
        buyer_id: buyer,
        seller_id: listing.seller_id,
        mode,
        amount_cents,
        shipping_cents,
        tax_cents,
        total_cents: amount_cents + shipping_cents + tax_cents,
        shipping_address: None,
        status: OfferStatus::Pending,
        funds_held: false,
        expires_at,
        responded_at: None,
        created_at: now,
    }
}
