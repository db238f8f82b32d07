//! Threads and messages.
//!
//! The `pub(crate)` helpers here are the only way settlement code writes to
//! the conversation log, so every transition that moves money appends its
//! message inside the same transaction and keeps the thread pointers current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use ineedit_shared::constants::MAX_MESSAGE_CHARS;
use ineedit_shared::{AccountId, ListingId, OfferId, OfferStatus, SystemEvent, ThreadId};
use ineedit_store::{
    listings, messages, threads, Connection, InboxEntry, Message, MessageBody, Order, Thread,
};

use crate::error::{MarketError, OrNotFound, Result};
use crate::ids::IdGenerator;
use crate::market::Market;
use crate::principal::Principal;

// ---------------------------------------------------------------------------
// Settlement helpers
// ---------------------------------------------------------------------------

pub(crate) fn open_thread(
    conn: &Connection,
    ids: &dyn IdGenerator,
    listing: ListingId,
    buyer: AccountId,
    seller: AccountId,
    now: DateTime<Utc>,
) -> Result<Thread> {
    Ok(threads::find_or_create(conn, ids.thread_id(), listing, buyer, seller, now)?)
}

/// Append a message and move the thread's last-message pointers to it.
pub(crate) fn post(
    conn: &Connection,
    ids: &dyn IdGenerator,
    thread: &Thread,
    sender: Option<AccountId>,
    body: MessageBody,
    now: DateTime<Utc>,
) -> Result<Message> {
    let message = Message {
        id: ids.message_id(),
        thread_id: thread.id,
        listing_id: thread.listing_id,
        sender_id: sender,
        body,
        read_by: Vec::new(),
        created_at: now,
    };
    messages::insert(conn, &message)?;
    threads::touch(conn, thread.id, message.id, now)?;
    Ok(message)
}

/// Append the order-scoped system `event` unless it was already recorded.
/// Returns whether a message was written.
pub(crate) fn post_order_event(
    conn: &Connection,
    ids: &dyn IdGenerator,
    order: &Order,
    event: SystemEvent,
    sender: Option<AccountId>,
    data: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<bool> {
    if messages::has_order_event(conn, order.id, event)? {
        return Ok(false);
    }
    let thread = match order.thread_id {
        Some(id) => threads::get(conn, id)?,
        None => open_thread(conn, ids, order.listing_id, order.buyer_id, order.seller_id, now)?,
    };
    let body = MessageBody::System {
        event,
        order_id: Some(order.id),
        data,
    };
    post(conn, ids, &thread, sender, body, now)?;
    Ok(true)
}

/// Bring every offer message's embedded snapshot in line with the offer's
/// new status.
pub(crate) fn refresh_offer_snapshot(
    conn: &Connection,
    offer: OfferId,
    status: OfferStatus,
) -> Result<()> {
    messages::set_offer_snapshot_status(conn, offer, status)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Where a new text message goes: an existing thread, or a listing whose
/// seller the caller is contacting for the first time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub thread_id: Option<ThreadId>,
    pub listing_id: Option<ListingId>,
    pub content: String,
}

/// Inbox split by the caller's role in each thread.
#[derive(Debug, Clone, Serialize)]
pub struct Inbox {
    pub buying: Vec<InboxEntry>,
    pub selling: Vec<InboxEntry>,
}

impl Market {
    pub fn send_message(&self, principal: &Principal, req: SendMessage) -> Result<Message> {
        let content = req.content.trim().to_string();
        if content.is_empty() {
            return Err(MarketError::InvalidRequest("message is empty".into()));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(MarketError::InvalidRequest(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        let me = principal.account_id;
        let now = self.now();

        let message = self.write("send_message", |tx| {
            let thread = match (req.thread_id, req.listing_id) {
                (Some(thread_id), _) => {
                    let thread = threads::get(tx, thread_id).or_not_found("thread")?;
                    if !thread.is_participant(me) {
                        return Err(MarketError::Forbidden("not a participant in this thread"));
                    }
                    thread
                }
                (None, Some(listing_id)) => {
                    let listing = listings::get(tx, listing_id).or_not_found("listing")?;
                    if listing.seller_id == me {
                        return Err(MarketError::InvalidRequest(
                            "sellers reply inside an existing thread".into(),
                        ));
                    }
                    open_thread(tx, self.ids.as_ref(), listing.id, me, listing.seller_id, now)?
                }
                (None, None) => {
                    return Err(MarketError::InvalidRequest(
                        "thread_id or listing_id is required".into(),
                    ))
                }
            };
            post(tx, self.ids.as_ref(), &thread, Some(me), MessageBody::Text { content }, now)
        })?;

        info!(message_id = %message.id, thread_id = %message.thread_id, "message sent");
        Ok(message)
    }

    /// Messages of a thread the caller participates in, oldest first.
    pub fn thread_messages(&self, principal: &Principal, thread_id: ThreadId) -> Result<Vec<Message>> {
        let db = self.open()?;
        let thread = threads::get(db.conn(), thread_id).or_not_found("thread")?;
        if !thread.is_participant(principal.account_id) {
            return Err(MarketError::Forbidden("not a participant in this thread"));
        }
        Ok(messages::list_for_thread(db.conn(), thread_id)?)
    }

    /// Add the caller's read receipt to every message they have not read.
    pub fn mark_thread_read(&self, principal: &Principal, thread_id: ThreadId) -> Result<usize> {
        let now = self.now();
        self.write("mark_thread_read", |tx| {
            let thread = threads::get(tx, thread_id).or_not_found("thread")?;
            if !thread.is_participant(principal.account_id) {
                return Err(MarketError::Forbidden("not a participant in this thread"));
            }
            Ok(messages::mark_thread_read(tx, thread_id, principal.account_id, now)?)
        })
    }

    pub fn inbox(&self, principal: &Principal) -> Result<Inbox> {
        let db = self.open()?;
        let (buying, selling) = threads::inbox(db.conn(), principal.account_id)?
            .into_iter()
            .partition(|entry| entry.thread.buyer_id == principal.account_id);
        Ok(Inbox { buying, selling })
    }
}
