//! Listings, shipping options, favorites and the availability gate.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use ineedit_shared::{AccountId, ListingId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Listing, ShippingOption};
use crate::rows;

const LISTING_COLUMNS: &str = "id, seller_id, title, description, price_cents, \
     original_price_cents, thumbnail, buyer_id, is_sold, is_deleted, is_draft, \
     is_free_shipping, can_offer, created_at, updated_at";

// ------------------------------------------------------------------
// Create / read
// ------------------------------------------------------------------

/// Insert a listing together with its shipping options.
pub fn insert(conn: &Connection, listing: &Listing) -> Result<()> {
    conn.execute(
        "INSERT INTO listings (id, seller_id, title, description, price_cents,
             original_price_cents, thumbnail, buyer_id, is_sold, is_deleted, is_draft,
             is_free_shipping, can_offer, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            listing.id.to_string(),
            listing.seller_id.to_string(),
            listing.title,
            listing.description,
            listing.price_cents,
            listing.original_price_cents,
            listing.thumbnail,
            listing.buyer_id.map(|b| b.to_string()),
            listing.is_sold,
            listing.is_deleted,
            listing.is_draft,
            listing.is_free_shipping,
            listing.can_offer,
            rows::ts(&listing.created_at),
            rows::ts(&listing.updated_at),
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO listing_shipping (listing_id, region, cost_cents, enabled)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for option in &listing.shipping_options {
        stmt.execute(params![
            listing.id.to_string(),
            option.region,
            option.cost_cents,
            option.enabled,
        ])?;
    }
    Ok(())
}

pub fn get(conn: &Connection, id: ListingId) -> Result<Listing> {
    let mut listing = conn
        .query_row(
            &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1"),
            params![id.to_string()],
            row_to_listing,
        )
        .map_err(not_found)?;
    listing.shipping_options = shipping_options(conn, id)?;
    Ok(listing)
}

pub fn shipping_options(conn: &Connection, id: ListingId) -> Result<Vec<ShippingOption>> {
    let mut stmt = conn.prepare(
        "SELECT region, cost_cents, enabled FROM listing_shipping
         WHERE listing_id = ?1 ORDER BY region ASC",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| {
        Ok(ShippingOption {
            region: row.get(0)?,
            cost_cents: row.get(1)?,
            enabled: row.get(2)?,
        })
    })?;

    let mut options = Vec::new();
    for row in rows {
        options.push(row?);
    }
    Ok(options)
}

/// Listings owned by `seller`, newest first.
pub fn list_for_seller(conn: &Connection, seller: AccountId) -> Result<Vec<Listing>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings
         WHERE seller_id = ?1 AND is_deleted = 0
         ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map(params![seller.to_string()], row_to_listing)?;

    let mut listings = Vec::new();
    for row in rows {
        let mut listing = row?;
        listing.shipping_options = shipping_options(conn, listing.id)?;
        listings.push(listing);
    }
    Ok(listings)
}

// ------------------------------------------------------------------
// Availability gate
// ------------------------------------------------------------------

/// Flip the listing to sold for `buyer`, only if it is currently unsold,
/// undeleted, published and not owned by `buyer`.
///
/// Returns `false` when any of those conditions failed at write time; among
/// concurrent callers exactly one can observe `true`.
pub fn reserve_for_sale(
    conn: &Connection,
    id: ListingId,
    buyer: AccountId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE listings SET is_sold = 1, buyer_id = ?1, updated_at = ?2
         WHERE id = ?3 AND is_sold = 0 AND is_deleted = 0 AND is_draft = 0
           AND seller_id <> ?1",
        params![buyer.to_string(), rows::ts(&now), id.to_string()],
    )?;
    Ok(affected == 1)
}

/// Publish a draft. Returns `false` if it was not a live draft.
pub fn publish(conn: &Connection, id: ListingId, now: DateTime<Utc>) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE listings SET is_draft = 0, updated_at = ?1
         WHERE id = ?2 AND is_draft = 1 AND is_deleted = 0",
        params![rows::ts(&now), id.to_string()],
    )?;
    Ok(affected == 1)
}

/// Soft-delete an unsold listing.
pub fn soft_delete(conn: &Connection, id: ListingId, now: DateTime<Utc>) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE listings SET is_deleted = 1, updated_at = ?1
         WHERE id = ?2 AND is_deleted = 0 AND is_sold = 0",
        params![rows::ts(&now), id.to_string()],
    )?;
    Ok(affected == 1)
}

/// Lower the price of an available listing. The first drop remembers the
/// pre-drop price in `original_price_cents`.
pub fn drop_price(
    conn: &Connection,
    id: ListingId,
    new_price_cents: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE listings
         SET original_price_cents = COALESCE(original_price_cents, price_cents),
             price_cents = ?1,
             updated_at = ?2
         WHERE id = ?3 AND price_cents > ?1
           AND is_sold = 0 AND is_deleted = 0 AND is_draft = 0",
        params![new_price_cents, rows::ts(&now), id.to_string()],
    )?;
    Ok(affected == 1)
}

// ------------------------------------------------------------------
// Favorites
// ------------------------------------------------------------------

/// Returns `true` if the favorite was newly added.
pub fn add_favorite(
    conn: &Connection,
    account: AccountId,
    listing: ListingId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO favorites (account_id, listing_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![account.to_string(), listing.to_string(), rows::ts(&now)],
    )?;
    Ok(affected > 0)
}

pub fn remove_favorite(conn: &Connection, account: AccountId, listing: ListingId) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM favorites WHERE account_id = ?1 AND listing_id = ?2",
        params![account.to_string(), listing.to_string()],
    )?;
    Ok(affected > 0)
}

/// Accounts that favorited `listing`, oldest favorite first.
pub fn favoriters(conn: &Connection, listing: ListingId) -> Result<Vec<AccountId>> {
    let mut stmt = conn.prepare(
        "SELECT account_id FROM favorites WHERE listing_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(params![listing.to_string()], |row| rows::id(row, 0))?;

    let mut accounts = Vec::new();
    for row in rows {
        accounts.push(row?);
    }
    Ok(accounts)
}

impl Database {
    pub fn create_listing(&self, listing: &Listing) -> Result<()> {
        insert(self.conn(), listing)
    }

    pub fn get_listing(&self, id: ListingId) -> Result<Listing> {
        get(self.conn(), id)
    }
}

fn row_to_listing(row: &rusqlite::Row<'_>) -> rusqlite::Result<Listing> {
    Ok(Listing {
        id: rows::id(row, 0)?,
        seller_id: rows::id(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        price_cents: row.get(4)?,
        original_price_cents: row.get(5)?,
        thumbnail: row.get(6)?,
        buyer_id: rows::opt_id(row, 7)?,
        is_sold: row.get(8)?,
        is_deleted: row.get(9)?,
        is_draft: row.get(10)?,
        is_free_shipping: row.get(11)?,
        can_offer: row.get(12)?,
        shipping_options: Vec::new(),
        created_at: rows::time(row, 13)?,
        updated_at: rows::time(row, 14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::StoreError;

    fn setup() -> (tempfile::TempDir, Database, AccountId, Listing) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("listings.db")).unwrap();
        let seller = AccountId::new();
        db.create_account(&Account {
            id: seller,
            display_name: "seller".into(),
            balance_cents: 0,
            created_at: Utc::now(),
        })
        .unwrap();

        let now = Utc::now();
        let listing = Listing {
            id: ListingId::new(),
            seller_id: seller,
            title: "Wool overcoat".into(),
            description: String::new(),
            price_cents: 10_000,
            original_price_cents: None,
            thumbnail: None,
            buyer_id: None,
            is_sold: false,
            is_deleted: false,
            is_draft: false,
            is_free_shipping: false,
            can_offer: true,
            shipping_options: vec![ShippingOption {
                region: "United States".into(),
                cost_cents: 2_000,
                enabled: true,
            }],
            created_at: now,
            updated_at: now,
        };
        db.create_listing(&listing).unwrap();
        (dir, db, seller, listing)
    }

    fn buyer(db: &Database) -> AccountId {
        let id = AccountId::new();
        db.create_account(&Account {
            id,
            display_name: "buyer".into(),
            balance_cents: 0,
            created_at: Utc::now(),
        })
        .unwrap();
        id
    }

    #[test]
    fn listing_round_trips_with_shipping() {
        let (_dir, db, _, listing) = setup();
        let loaded = db.get_listing(listing.id).unwrap();
        assert_eq!(loaded.shipping_options.len(), 1);
        assert_eq!(loaded.shipping_cents_to("United States"), Some(2_000));
        assert_eq!(loaded.shipping_cents_to("Canada"), None);
    }

    #[test]
    fn missing_listing_is_not_found() {
        let (_dir, db, _, _) = setup();
        assert!(matches!(
            db.get_listing(ListingId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn reserve_succeeds_once() {
        let (_dir, db, _, listing) = setup();
        let first = buyer(&db);
        let second = buyer(&db);
        let now = Utc::now();

        assert!(reserve_for_sale(db.conn(), listing.id, first, now).unwrap());
        assert!(!reserve_for_sale(db.conn(), listing.id, second, now).unwrap());

        let loaded = db.get_listing(listing.id).unwrap();
        assert!(loaded.is_sold);
        assert_eq!(loaded.buyer_id, Some(first));
    }

    #[test]
    fn seller_cannot_reserve_own_listing() {
        let (_dir, db, seller, listing) = setup();
        assert!(!reserve_for_sale(db.conn(), listing.id, seller, Utc::now()).unwrap());
    }

    #[test]
    fn deleted_listing_cannot_be_reserved() {
        let (_dir, db, _, listing) = setup();
        let b = buyer(&db);
        assert!(soft_delete(db.conn(), listing.id, Utc::now()).unwrap());
        assert!(!reserve_for_sale(db.conn(), listing.id, b, Utc::now()).unwrap());
    }

    #[test]
    fn price_drop_must_lower_the_price() {
        let (_dir, db, _, listing) = setup();
        assert!(!drop_price(db.conn(), listing.id, 10_000, Utc::now()).unwrap());
        assert!(drop_price(db.conn(), listing.id, 8_000, Utc::now()).unwrap());
        assert!(drop_price(db.conn(), listing.id, 7_000, Utc::now()).unwrap());

        let loaded = db.get_listing(listing.id).unwrap();
        assert_eq!(loaded.price_cents, 7_000);
        assert_eq!(loaded.original_price_cents, Some(10_000));
    }

    #[test]
    fn favorites_are_unique_per_account() {
        let (_dir, db, _, listing) = setup();
        let b = buyer(&db);
        assert!(add_favorite(db.conn(), b, listing.id, Utc::now()).unwrap());
        assert!(!add_favorite(db.conn(), b, listing.id, Utc::now()).unwrap());
        assert_eq!(favoriters(db.conn(), listing.id).unwrap(), vec![b]);
        assert!(remove_favorite(db.conn(), b, listing.id).unwrap());
        assert!(favoriters(db.conn(), listing.id).unwrap().is_empty());
    }
}
