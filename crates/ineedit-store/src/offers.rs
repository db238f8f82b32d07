//! Offer rows and their conditional status transition.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use ineedit_shared::{AccountId, ListingId, OfferId, OfferMode, OfferStatus};

use crate::error::{not_found, Result};
use crate::models::Offer;
use crate::rows;

const OFFER_COLUMNS: &str = "id, listing_id, buyer_id, seller_id, mode, amount_cents, \
     shipping_cents, tax_cents, total_cents, shipping_address, status, funds_held, \
     expires_at, responded_at, created_at";

pub fn insert(conn: &Connection, offer: &Offer) -> Result<()> {
    let address = offer
        .shipping_address
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO offers (id, listing_id, buyer_id, seller_id, mode, amount_cents,
             shipping_cents, tax_cents, total_cents, shipping_address, status, funds_held,
             expires_at, responded_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            offer.id.to_string(),
            offer.listing_id.to_string(),
            offer.buyer_id.to_string(),
            offer.seller_id.to_string(),
            offer.mode.as_str(),
            offer.amount_cents,
            offer.shipping_cents,
            offer.tax_cents,
            offer.total_cents,
            address,
            offer.status.as_str(),
            offer.funds_held,
            rows::opt_ts(&offer.expires_at),
            rows::opt_ts(&offer.responded_at),
            rows::ts(&offer.created_at),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: OfferId) -> Result<Offer> {
    conn.query_row(
        &format!("SELECT {OFFER_COLUMNS} FROM offers WHERE id = ?1"),
        params![id.to_string()],
        row_to_offer,
    )
    .map_err(not_found)
}

/// Move a pending offer to the terminal status `to`, clearing its fund hold.
///
/// The write only applies while the row is still `pending` with the
/// `funds_held` value the caller read, so of several racing accept /
/// decline / expire attempts exactly one sees `true` and may move money.
pub fn transition_from_pending(
    conn: &Connection,
    id: OfferId,
    to: OfferStatus,
    expected_funds_held: bool,
    now: DateTime<Utc>,
) -> Result<bool> {
    debug_assert!(to.is_terminal());
    let affected = conn.execute(
        "UPDATE offers SET status = ?1, funds_held = 0, responded_at = ?2
         WHERE id = ?3 AND status = 'pending' AND funds_held = ?4",
        params![
            to.as_str(),
            rows::ts(&now),
            id.to_string(),
            expected_funds_held,
        ],
    )?;
    Ok(affected == 1)
}

/// Record the shipping address a buyer supplied when accepting a
/// seller-initiated offer.
pub fn set_shipping_address(
    conn: &Connection,
    id: OfferId,
    address: &ineedit_shared::ShippingAddress,
) -> Result<()> {
    conn.execute(
        "UPDATE offers SET shipping_address = ?1 WHERE id = ?2",
        params![serde_json::to_string(address)?, id.to_string()],
    )?;
    Ok(())
}

/// Whether a pending offer of `mode` already exists for this
/// (listing, buyer) pair.
pub fn pending_exists_for_buyer(
    conn: &Connection,
    listing: ListingId,
    buyer: AccountId,
    mode: OfferMode,
) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM offers
             WHERE listing_id = ?1 AND buyer_id = ?2 AND mode = ?3 AND status = 'pending'
             LIMIT 1",
            params![listing.to_string(), buyer.to_string(), mode.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Whether any broadcast from `seller` on `listing` is still pending.
pub fn pending_broadcast_exists(
    conn: &Connection,
    listing: ListingId,
    seller: AccountId,
) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM offers
             WHERE listing_id = ?1 AND seller_id = ?2
               AND mode = 'seller_broadcast' AND status = 'pending'
             LIMIT 1",
            params![listing.to_string(), seller.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Distinct broadcast prices ever sent on `listing`, in wave order.
///
/// Each wave is priced strictly below the one before it, so wave order is
/// descending price. Creation times can tie within a millisecond and are
/// not used.
pub fn broadcast_price_points(conn: &Connection, listing: ListingId) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT amount_cents FROM offers
         WHERE listing_id = ?1 AND mode = 'seller_broadcast'
         ORDER BY amount_cents DESC",
    )?;
    let rows = stmt.query_map(params![listing.to_string()], |row| row.get(0))?;

    let mut prices = Vec::new();
    for row in rows {
        prices.push(row?);
    }
    Ok(prices)
}

/// Pending offers on `listing`, oldest first.
pub fn pending_for_listing(conn: &Connection, listing: ListingId) -> Result<Vec<Offer>> {
    query_offers(
        conn,
        &format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE listing_id = ?1 AND status = 'pending'
             ORDER BY created_at ASC"
        ),
        params![listing.to_string()],
    )
}

/// Pending offers whose deadline is at or before `now`. `listing` narrows
/// the scan to one listing.
pub fn due_for_expiry(
    conn: &Connection,
    now: DateTime<Utc>,
    listing: Option<ListingId>,
) -> Result<Vec<Offer>> {
    query_offers(
        conn,
        &format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1
               AND (?2 IS NULL OR listing_id = ?2)
             ORDER BY expires_at ASC"
        ),
        params![rows::ts(&now), listing.map(|l| l.to_string())],
    )
}

/// Offers where `account` is buyer or seller, newest first.
pub fn list_for_account(conn: &Connection, account: AccountId) -> Result<Vec<Offer>> {
    query_offers(
        conn,
        &format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE buyer_id = ?1 OR seller_id = ?1
             ORDER BY created_at DESC"
        ),
        params![account.to_string()],
    )
}

/// Sum of every buyer-mode hold still outstanding.
pub fn total_held(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(total_cents), 0) FROM offers WHERE funds_held = 1",
        [],
        |row| row.get(0),
    )?)
}

fn query_offers(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Offer>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_offer)?;

    let mut offers = Vec::new();
    for row in rows {
        offers.push(row?);
    }
    Ok(offers)
}

fn row_to_offer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Offer> {
    Ok(Offer {
        id: rows::id(row, 0)?,
        listing_id: rows::id(row, 1)?,
        buyer_id: rows::id(row, 2)?,
        seller_id: rows::id(row, 3)?,
        mode: rows::parsed(row, 4)?,
        amount_cents: row.get(5)?,
        shipping_cents: row.get(6)?,
        tax_cents: row.get(7)?,
        total_cents: row.get(8)?,
        shipping_address: rows::opt_json(row, 9)?,
        status: rows::parsed(row, 10)?,
        funds_held: row.get(11)?,
        expires_at: rows::opt_time(row, 12)?,
        responded_at: rows::opt_time(row, 13)?,
        created_at: rows::time(row, 14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, Listing};
    use crate::Database;
    use chrono::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Database,
        listing: ListingId,
        seller: AccountId,
        buyer: AccountId,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("offers.db")).unwrap();
        let now = Utc::now();
        let mut ids = Vec::new();
        for name in ["seller", "buyer"] {
            let id = AccountId::new();
            db.create_account(&Account {
                id,
                display_name: name.into(),
                balance_cents: 0,
                created_at: now,
            })
            .unwrap();
            ids.push(id);
        }
        let listing = ListingId::new();
        db.create_listing(&Listing {
            id: listing,
            seller_id: ids[0],
            title: "Boots".into(),
            description: String::new(),
            price_cents: 10_000,
            original_price_cents: None,
            thumbnail: None,
            buyer_id: None,
            is_sold: false,
            is_deleted: false,
            is_draft: false,
            is_free_shipping: true,
            can_offer: true,
            shipping_options: Vec::new(),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
        Fixture {
            _dir: dir,
            db,
            listing,
            seller: ids[0],
            buyer: ids[1],
        }
    }

    fn offer(f: &Fixture, mode: OfferMode, amount: i64, expires_at: Option<DateTime<Utc>>) -> Offer {
        let o = Offer {
            id: OfferId::new(),
            listing_id: f.listing,
            buyer_id: f.buyer,
            seller_id: f.seller,
            mode,
            amount_cents: amount,
            shipping_cents: 0,
            tax_cents: 0,
            total_cents: amount,
            shipping_address: None,
            status: OfferStatus::Pending,
            funds_held: mode == OfferMode::Buyer,
            expires_at,
            responded_at: None,
            created_at: Utc::now(),
        };
        insert(f.db.conn(), &o).unwrap();
        o
    }

    #[test]
    fn only_first_transition_applies() {
        let f = fixture();
        let o = offer(&f, OfferMode::Buyer, 7_000, None);
        let now = Utc::now();

        assert!(transition_from_pending(f.db.conn(), o.id, OfferStatus::Declined, true, now).unwrap());
        assert!(!transition_from_pending(f.db.conn(), o.id, OfferStatus::Expired, true, now).unwrap());

        let loaded = get(f.db.conn(), o.id).unwrap();
        assert_eq!(loaded.status, OfferStatus::Declined);
        assert!(!loaded.funds_held);
        assert_eq!(loaded.responded_at.map(|t| rows::ts(&t)), Some(rows::ts(&now)));
    }

    #[test]
    fn total_must_equal_components() {
        let f = fixture();
        let mut o = offer(&f, OfferMode::Buyer, 7_000, None);
        o.id = OfferId::new();
        o.total_cents = 1;
        assert!(insert(f.db.conn(), &o).is_err());
    }

    #[test]
    fn due_for_expiry_respects_deadline() {
        let f = fixture();
        let now = Utc::now();
        let stale = offer(&f, OfferMode::Buyer, 7_000, Some(now - Duration::hours(1)));
        offer(&f, OfferMode::Buyer, 7_000, Some(now + Duration::hours(1)));
        offer(&f, OfferMode::Buyer, 7_000, None);

        let due = due_for_expiry(f.db.conn(), now, None).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, stale.id);

        let due_here = due_for_expiry(f.db.conn(), now, Some(f.listing)).unwrap();
        assert_eq!(due_here.len(), 1);
        assert!(due_for_expiry(f.db.conn(), now, Some(ListingId::new())).unwrap().is_empty());
    }

    #[test]
    fn broadcast_waves_are_distinct_prices_in_order() {
        let f = fixture();
        offer(&f, OfferMode::SellerBroadcast, 9_000, None);
        offer(&f, OfferMode::SellerBroadcast, 9_000, None);
        offer(&f, OfferMode::SellerBroadcast, 8_100, None);
        offer(&f, OfferMode::SellerBroadcast, 7_290, None);

        assert_eq!(
            broadcast_price_points(f.db.conn(), f.listing).unwrap(),
            vec![9_000, 8_100, 7_290]
        );
        assert!(pending_broadcast_exists(f.db.conn(), f.listing, f.seller).unwrap());
    }

    #[test]
    fn pending_check_is_scoped_by_mode() {
        let f = fixture();
        offer(&f, OfferMode::SellerPrivate, 9_000, None);
        assert!(pending_exists_for_buyer(f.db.conn(), f.listing, f.buyer, OfferMode::SellerPrivate).unwrap());
        assert!(!pending_exists_for_buyer(f.db.conn(), f.listing, f.buyer, OfferMode::Buyer).unwrap());
    }
}
