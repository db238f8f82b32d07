//! Conversation threads, one per (listing, buyer, seller).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use ineedit_shared::{AccountId, ArchiveReason, ListingId, MessageId, ThreadId};

use crate::error::{not_found, Result};
use crate::models::{InboxEntry, Thread};
use crate::rows;

const THREAD_COLUMNS: &str = "id, listing_id, buyer_id, seller_id, last_message_id, \
     last_message_at, archived_reason, created_at";

/// Return the thread for this triple, creating it with `new_id` if absent.
pub fn find_or_create(
    conn: &Connection,
    new_id: ThreadId,
    listing: ListingId,
    buyer: AccountId,
    seller: AccountId,
    now: DateTime<Utc>,
) -> Result<Thread> {
    let now = rows::ts(&now);
    conn.execute(
        "INSERT OR IGNORE INTO threads
             (id, listing_id, buyer_id, seller_id, last_message_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            new_id.to_string(),
            listing.to_string(),
            buyer.to_string(),
            seller.to_string(),
            now,
        ],
    )?;

    conn.query_row(
        &format!(
            "SELECT {THREAD_COLUMNS} FROM threads
             WHERE listing_id = ?1 AND buyer_id = ?2 AND seller_id = ?3"
        ),
        params![listing.to_string(), buyer.to_string(), seller.to_string()],
        row_to_thread,
    )
    .map_err(not_found)
}

pub fn get(conn: &Connection, id: ThreadId) -> Result<Thread> {
    conn.query_row(
        &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
        params![id.to_string()],
        row_to_thread,
    )
    .map_err(not_found)
}

/// Point the thread at its newest message.
pub fn touch(conn: &Connection, id: ThreadId, message: MessageId, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE threads SET last_message_id = ?1, last_message_at = ?2 WHERE id = ?3",
        params![message.to_string(), rows::ts(&at), id.to_string()],
    )?;
    Ok(())
}

/// Archive every live thread on `listing` except the one with `keep_buyer`.
pub fn archive_for_listing(
    conn: &Connection,
    listing: ListingId,
    keep_buyer: Option<AccountId>,
    reason: ArchiveReason,
) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE threads SET archived_reason = ?1
         WHERE listing_id = ?2 AND archived_reason IS NULL
           AND (?3 IS NULL OR buyer_id <> ?3)",
        params![
            reason.as_str(),
            listing.to_string(),
            keep_buyer.map(|b| b.to_string()),
        ],
    )?;
    Ok(affected)
}

/// Threads where `account` participates, most recently active first, with
/// the count of messages from others that `account` has not read.
pub fn inbox(conn: &Connection, account: AccountId) -> Result<Vec<InboxEntry>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.listing_id, t.buyer_id, t.seller_id, t.last_message_id,
                t.last_message_at, t.archived_reason, t.created_at,
                (SELECT COUNT(*) FROM messages m
                  WHERE m.thread_id = t.id
                    AND (m.sender_id IS NULL OR m.sender_id <> ?1)
                    AND NOT EXISTS (SELECT 1 FROM message_reads r
                                     WHERE r.message_id = m.id AND r.account_id = ?1))
         FROM threads t
         WHERE t.buyer_id = ?1 OR t.seller_id = ?1
         ORDER BY t.last_message_at DESC",
    )?;
    let rows = stmt.query_map(params![account.to_string()], |row| {
        Ok(InboxEntry {
            thread: row_to_thread(row)?,
            unread_count: row.get(8)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: rows::id(row, 0)?,
        listing_id: rows::id(row, 1)?,
        buyer_id: rows::id(row, 2)?,
        seller_id: rows::id(row, 3)?,
        last_message_id: rows::opt_id(row, 4)?,
        last_message_at: rows::time(row, 5)?,
        archived_reason: rows::opt_parsed(row, 6)?,
        created_at: rows::time(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, Listing};
    use crate::Database;

    fn setup() -> (tempfile::TempDir, Database, ListingId, AccountId) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("threads.db")).unwrap();
        let now = Utc::now();
        let seller = AccountId::new();
        db.create_account(&Account {
            id: seller,
            display_name: "seller".into(),
            balance_cents: 0,
            created_at: now,
        })
        .unwrap();
        let listing = ListingId::new();
        db.create_listing(&Listing {
            id: listing,
            seller_id: seller,
            title: "Lamp".into(),
            description: String::new(),
            price_cents: 4_000,
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
        (dir, db, listing, seller)
    }

    #[test]
    fn find_or_create_reuses_the_triple() {
        let (_dir, db, listing, seller) = setup();
        let buyer = AccountId::new();
        let now = Utc::now();

        let first = find_or_create(db.conn(), ThreadId::new(), listing, buyer, seller, now).unwrap();
        let again = find_or_create(db.conn(), ThreadId::new(), listing, buyer, seller, now).unwrap();
        assert_eq!(first.id, again.id);
    }

    #[test]
    fn archive_keeps_the_winning_buyer() {
        let (_dir, db, listing, seller) = setup();
        let winner = AccountId::new();
        let loser = AccountId::new();
        let now = Utc::now();
        let kept = find_or_create(db.conn(), ThreadId::new(), listing, winner, seller, now).unwrap();
        let other = find_or_create(db.conn(), ThreadId::new(), listing, loser, seller, now).unwrap();

        let archived =
            archive_for_listing(db.conn(), listing, Some(winner), ArchiveReason::SoldToOther).unwrap();
        assert_eq!(archived, 1);
        assert_eq!(get(db.conn(), kept.id).unwrap().archived_reason, None);
        assert_eq!(
            get(db.conn(), other.id).unwrap().archived_reason,
            Some(ArchiveReason::SoldToOther)
        );
    }
}
