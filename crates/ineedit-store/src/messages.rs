//! The append-only message log and per-reader receipts.
//!
//! A message's body is spread over typed columns by kind. The embedded offer
//! snapshot's `status` is the only field ever rewritten after insert.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use ineedit_shared::{
    AccountId, MessageId, MessageKind, OfferId, OfferStatus, OrderId, SystemEvent, ThreadId,
};

use crate::error::{not_found, Result};
use crate::models::{Message, MessageBody, ReadReceipt};
use crate::rows;

const MESSAGE_COLUMNS: &str = "id, thread_id, listing_id, sender_id, kind, content, \
     offer_snapshot, system_event, system_data, order_id, created_at";

pub fn insert(conn: &Connection, message: &Message) -> Result<()> {
    let mut content = None;
    let mut offer_id = None;
    let mut snapshot = None;
    let mut event = None;
    let mut data = None;
    let mut order_id = None;

    let kind = match &message.body {
        MessageBody::Text { content: text } => {
            content = Some(text.clone());
            MessageKind::Text
        }
        MessageBody::Offer { snapshot: s } => {
            offer_id = Some(s.offer_id.to_string());
            snapshot = Some(serde_json::to_string(s)?);
            MessageKind::Offer
        }
        MessageBody::System {
            event: e,
            order_id: o,
            data: d,
        } => {
            event = Some(e.as_str());
            order_id = o.map(|o| o.to_string());
            data = Some(serde_json::to_string(d)?);
            MessageKind::System
        }
    };

    conn.execute(
        "INSERT INTO messages (id, thread_id, listing_id, sender_id, kind, content, offer_id,
             offer_snapshot, system_event, system_data, order_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            message.id.to_string(),
            message.thread_id.to_string(),
            message.listing_id.to_string(),
            message.sender_id.map(|s| s.to_string()),
            kind.as_str(),
            content,
            offer_id,
            snapshot,
            event,
            data,
            order_id,
            rows::ts(&message.created_at),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: MessageId) -> Result<Message> {
    let mut message = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id.to_string()],
            row_to_message,
        )
        .map_err(not_found)?;
    message.read_by = receipts(conn, id)?;
    Ok(message)
}

/// Messages in a thread, oldest first.
pub fn list_for_thread(conn: &Connection, thread: ThreadId) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = ?1
         ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map(params![thread.to_string()], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        let mut message = row?;
        message.read_by = receipts(conn, message.id)?;
        messages.push(message);
    }
    Ok(messages)
}

/// Rewrite the status inside every offer message carrying `offer`.
pub fn set_offer_snapshot_status(conn: &Connection, offer: OfferId, status: OfferStatus) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE messages SET offer_snapshot = json_set(offer_snapshot, '$.status', ?1)
         WHERE offer_id = ?2 AND kind = 'offer'",
        params![status.as_str(), offer.to_string()],
    )?;
    Ok(affected)
}

/// Whether the order-scoped system `event` has already been recorded.
pub fn has_order_event(conn: &Connection, order: OrderId, event: SystemEvent) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM messages WHERE order_id = ?1 AND system_event = ?2",
            params![order.to_string(), event.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Record `reader` as having read every message in the thread it did not
/// send. Returns the number of new receipts.
pub fn mark_thread_read(
    conn: &Connection,
    thread: ThreadId,
    reader: AccountId,
    now: DateTime<Utc>,
) -> Result<usize> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO message_reads (message_id, account_id, read_at)
         SELECT id, ?1, ?2 FROM messages
         WHERE thread_id = ?3 AND (sender_id IS NULL OR sender_id <> ?1)",
        params![reader.to_string(), rows::ts(&now), thread.to_string()],
    )?;
    Ok(affected)
}

fn receipts(conn: &Connection, message: MessageId) -> Result<Vec<ReadReceipt>> {
    let mut stmt = conn.prepare(
        "SELECT account_id, read_at FROM message_reads WHERE message_id = ?1 ORDER BY read_at",
    )?;
    let rows = stmt.query_map(params![message.to_string()], |row| {
        Ok(ReadReceipt {
            account_id: rows::id(row, 0)?,
            at: rows::time(row, 1)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn missing(idx: usize, column: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column.to_string(), Type::Null)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: MessageKind = rows::parsed(row, 4)?;
    let body = match kind {
        MessageKind::Text => {
            let content: Option<String> = row.get(5)?;
            MessageBody::Text {
                content: content.unwrap_or_default(),
            }
        }
        MessageKind::Offer => MessageBody::Offer {
            snapshot: rows::opt_json(row, 6)?.ok_or_else(|| missing(6, "offer_snapshot"))?,
        },
        MessageKind::System => MessageBody::System {
            event: rows::opt_parsed(row, 7)?.ok_or_else(|| missing(7, "system_event"))?,
            order_id: rows::opt_id(row, 9)?,
            data: rows::opt_json(row, 8)?.unwrap_or(serde_json::Value::Null),
        },
    };

    Ok(Message {
        id: rows::id(row, 0)?,
        thread_id: rows::id(row, 1)?,
        listing_id: rows::id(row, 2)?,
        sender_id: rows::opt_id(row, 3)?,
        body,
        read_by: Vec::new(),
        created_at: rows::time(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, Listing, OfferSnapshot};
    use crate::{threads, Database};
    use ineedit_shared::{ListingId, OfferMode};

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Database,
        thread: ThreadId,
        listing: ListingId,
        buyer: AccountId,
        seller: AccountId,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("messages.db")).unwrap();
        let now = Utc::now();
        let seller = AccountId::new();
        let buyer = AccountId::new();
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
            title: "Chair".into(),
            description: String::new(),
            price_cents: 5_000,
            original_price_cents: None,
            thumbnail: None,
            buyer_id: None,
            is_sold: false,
            is_deleted: false,
            is_draft: false,
            is_free_shipping: false,
            can_offer: true,
            shipping_options: Vec::new(),
            created_at: now,
            updated_at: now,
        })
        .unwrap();
        let thread = threads::find_or_create(db.conn(), ThreadId::new(), listing, buyer, seller, now)
            .unwrap()
            .id;
        Fixture {
            _dir: dir,
            db,
            thread,
            listing,
            buyer,
            seller,
        }
    }

    fn message(f: &Fixture, sender: Option<AccountId>, body: MessageBody) -> Message {
        Message {
            id: MessageId::new(),
            thread_id: f.thread,
            listing_id: f.listing,
            sender_id: sender,
            body,
            read_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn bodies_survive_storage() {
        let f = fixture();
        let order = OrderId::new();
        let system = message(
            &f,
            None,
            MessageBody::System {
                event: SystemEvent::OrderShipped,
                order_id: Some(order),
                data: serde_json::json!({ "tracking_number": "1Z" }),
            },
        );
        let text = message(&f, Some(f.buyer), MessageBody::Text { content: "hi".into() });
        insert(f.db.conn(), &text).unwrap();
        insert(f.db.conn(), &system).unwrap();

        assert_eq!(get(f.db.conn(), text.id).unwrap().body, text.body);
        assert_eq!(get(f.db.conn(), system.id).unwrap().body, system.body);
        assert!(has_order_event(f.db.conn(), order, SystemEvent::OrderShipped).unwrap());
        assert!(!has_order_event(f.db.conn(), order, SystemEvent::OrderDelivered).unwrap());
    }

    #[test]
    fn order_event_is_unique() {
        let f = fixture();
        let order = OrderId::new();
        let body = MessageBody::System {
            event: SystemEvent::PayoutReleased,
            order_id: Some(order),
            data: serde_json::Value::Null,
        };
        insert(f.db.conn(), &message(&f, None, body.clone())).unwrap();
        let err = insert(f.db.conn(), &message(&f, None, body)).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn offer_snapshot_status_is_rewritten() {
        let f = fixture();
        let snapshot = OfferSnapshot {
            offer_id: OfferId::new(),
            mode: OfferMode::Buyer,
            amount_cents: 4_000,
            shipping_cents: 500,
            tax_cents: 0,
            total_cents: 4_500,
            list_price_cents: 5_000,
            status: OfferStatus::Pending,
            expires_at: None,
        };
        let msg = message(&f, Some(f.buyer), MessageBody::Offer { snapshot: snapshot.clone() });
        insert(f.db.conn(), &msg).unwrap();

        assert_eq!(
            set_offer_snapshot_status(f.db.conn(), snapshot.offer_id, OfferStatus::Declined).unwrap(),
            1
        );
        match get(f.db.conn(), msg.id).unwrap().body {
            MessageBody::Offer { snapshot: stored } => {
                assert_eq!(stored.status, OfferStatus::Declined);
                assert_eq!(stored.amount_cents, 4_000);
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn reading_skips_own_messages() {
        let f = fixture();
        insert(f.db.conn(), &message(&f, Some(f.buyer), MessageBody::Text { content: "a".into() })).unwrap();
        insert(f.db.conn(), &message(&f, Some(f.seller), MessageBody::Text { content: "b".into() })).unwrap();

        let inbox = threads::inbox(f.db.conn(), f.seller).unwrap();
        assert_eq!(inbox[0].unread_count, 1);

        assert_eq!(mark_thread_read(f.db.conn(), f.thread, f.seller, Utc::now()).unwrap(), 1);
        assert_eq!(mark_thread_read(f.db.conn(), f.thread, f.seller, Utc::now()).unwrap(), 0);
        assert_eq!(threads::inbox(f.db.conn(), f.seller).unwrap()[0].unread_count, 0);
    }
}
