//! Order rows, the append-only status history, escrow and refund columns.
//!
//! Every mutator is guarded by the state it expects to leave, so replays and
//! races degrade to "0 rows affected" rather than double application.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use ineedit_shared::{AccountId, ListingId, OrderId, OrderStatus, PartyRole};

use crate::error::{not_found, Result};
use crate::models::{Escrow, ListingSnapshot, NewOrder, Order, Refund, StatusChange};
use crate::rows;

const ORDER_COLUMNS: &str = "id, order_code, listing_id, buyer_id, seller_id, offer_id, \
     thread_id, status, item_price_cents, shipping_cents, tax_cents, total_cents, \
     shipping_address, tracking_number, carrier, shipped_at, delivered_at, \
     escrow_held_cents, escrow_status, escrow_released_at, seller_payout_cents, \
     platform_fee_cents, refund_mode, refund_amount_cents, refund_fee_cents, \
     refund_seller_debit_cents, refund_reason, refund_issued_at, snapshot_title, \
     snapshot_price_cents, snapshot_image_url, created_at";

// ------------------------------------------------------------------
// Create / read
// ------------------------------------------------------------------

/// Insert a PAID order holding `total_cents` in escrow and open its status
/// history. Fails with a constraint violation if the listing already has an
/// order.
pub fn insert(conn: &Connection, order: &NewOrder) -> Result<()> {
    let address = order
        .shipping_address
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO orders (id, order_code, listing_id, buyer_id, seller_id, offer_id,
             thread_id, status, item_price_cents, shipping_cents, tax_cents, total_cents,
             shipping_address, escrow_held_cents, escrow_status, snapshot_title,
             snapshot_price_cents, snapshot_image_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PAID', ?8, ?9, ?10, ?11, ?12, ?11, 'HELD',
                 ?13, ?14, ?15, ?16)",
        params![
            order.id.to_string(),
            order.order_code,
            order.listing_id.to_string(),
            order.buyer_id.to_string(),
            order.seller_id.to_string(),
            order.offer_id.map(|o| o.to_string()),
            order.thread_id.map(|t| t.to_string()),
            order.item_price_cents,
            order.shipping_cents,
            order.tax_cents,
            order.total_cents,
            address,
            order.listing_snapshot.title,
            order.listing_snapshot.price_cents,
            order.listing_snapshot.image_url,
            rows::ts(&order.created_at),
        ],
    )?;

    append_history(conn, order.id, OrderStatus::Paid, order.created_at)
}

pub fn get(conn: &Connection, id: OrderId) -> Result<Order> {
    let mut order = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
            params![id.to_string()],
            row_to_order,
        )
        .map_err(not_found)?;
    order.status_history = history(conn, id)?;
    Ok(order)
}

pub fn find_by_listing(conn: &Connection, listing: ListingId) -> Result<Option<Order>> {
    let order = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE listing_id = ?1"),
            params![listing.to_string()],
            row_to_order,
        )
        .optional()?;
    match order {
        Some(mut order) => {
            order.status_history = history(conn, order.id)?;
            Ok(Some(order))
        }
        None => Ok(None),
    }
}

/// Orders where `account` plays `role`, newest first.
pub fn list_for_account(conn: &Connection, account: AccountId, role: PartyRole) -> Result<Vec<Order>> {
    let column = match role {
        PartyRole::Buyer => "buyer_id",
        PartyRole::Seller => "seller_id",
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE {column} = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map(params![account.to_string()], row_to_order)?;

    let mut orders = Vec::new();
    for row in rows {
        let mut order = row?;
        order.status_history = history(conn, order.id)?;
        orders.push(order);
    }
    Ok(orders)
}

pub fn history(conn: &Connection, id: OrderId) -> Result<Vec<StatusChange>> {
    let mut stmt = conn.prepare(
        "SELECT status, at FROM order_status_history WHERE order_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| {
        Ok(StatusChange {
            status: rows::parsed(row, 0)?,
            at: rows::time(row, 1)?,
        })
    })?;

    let mut changes = Vec::new();
    for row in rows {
        changes.push(row?);
    }
    Ok(changes)
}

fn append_history(conn: &Connection, id: OrderId, status: OrderStatus, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO order_status_history (order_id, seq, status, at)
         VALUES (?1,
                 (SELECT COALESCE(MAX(seq) + 1, 0) FROM order_status_history WHERE order_id = ?1),
                 ?2, ?3)",
        params![id.to_string(), status.as_str(), rows::ts(&at)],
    )?;
    Ok(())
}

// ------------------------------------------------------------------
// Status transitions
// ------------------------------------------------------------------

/// PAID -> SHIPPED. The tracking number is only written if none exists yet.
pub fn mark_shipped(
    conn: &Connection,
    id: OrderId,
    tracking_number: &str,
    carrier: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders
         SET status = 'SHIPPED',
             tracking_number = COALESCE(tracking_number, ?1),
             carrier = COALESCE(carrier, ?2),
             shipped_at = ?3
         WHERE id = ?4 AND status = 'PAID'",
        params![tracking_number, carrier, rows::ts(&now), id.to_string()],
    )?;
    if affected == 1 {
        append_history(conn, id, OrderStatus::Shipped, now)?;
    }
    Ok(affected == 1)
}

/// SHIPPED -> DELIVERED.
pub fn mark_delivered(conn: &Connection, id: OrderId, now: DateTime<Utc>) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = 'DELIVERED', delivered_at = ?1
         WHERE id = ?2 AND status = 'SHIPPED'",
        params![rows::ts(&now), id.to_string()],
    )?;
    if affected == 1 {
        append_history(conn, id, OrderStatus::Delivered, now)?;
    }
    Ok(affected == 1)
}

/// PAID/SHIPPED -> CANCELED.
pub fn cancel(conn: &Connection, id: OrderId, now: DateTime<Utc>) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = 'CANCELED'
         WHERE id = ?1 AND status IN ('PAID', 'SHIPPED')",
        params![id.to_string()],
    )?;
    if affected == 1 {
        append_history(conn, id, OrderStatus::Canceled, now)?;
    }
    Ok(affected == 1)
}

// ------------------------------------------------------------------
// Escrow and refunds
// ------------------------------------------------------------------

/// HELD -> RELEASED on a delivered order, recording payout and fee.
pub fn release_escrow(
    conn: &Connection,
    id: OrderId,
    seller_payout_cents: i64,
    platform_fee_cents: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders
         SET escrow_status = 'RELEASED', escrow_released_at = ?1,
             seller_payout_cents = ?2, platform_fee_cents = ?3
         WHERE id = ?4 AND escrow_status = 'HELD' AND status = 'DELIVERED'",
        params![
            rows::ts(&now),
            seller_payout_cents,
            platform_fee_cents,
            id.to_string(),
        ],
    )?;
    Ok(affected == 1)
}

/// Take `amount_cents` out of a still-held escrow.
pub fn reduce_escrow(conn: &Connection, id: OrderId, amount_cents: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET escrow_held_cents = escrow_held_cents - ?1
         WHERE id = ?2 AND escrow_status = 'HELD' AND escrow_held_cents >= ?1",
        params![amount_cents, id.to_string()],
    )?;
    Ok(affected == 1)
}

/// Record the order's single refund. Returns `false` if one already exists.
pub fn record_refund(conn: &Connection, id: OrderId, refund: &Refund) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders
         SET refund_mode = ?1, refund_amount_cents = ?2, refund_fee_cents = ?3,
             refund_seller_debit_cents = ?4, refund_reason = ?5, refund_issued_at = ?6
         WHERE id = ?7 AND refund_issued_at IS NULL",
        params![
            refund.mode.as_str(),
            refund.amount_cents,
            refund.fee_cents,
            refund.seller_debit_cents,
            refund.reason.as_str(),
            rows::ts(&refund.issued_at),
            id.to_string(),
        ],
    )?;
    Ok(affected == 1)
}

/// Sum of all escrow not yet released.
pub fn total_escrow_held(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(escrow_held_cents), 0) FROM orders WHERE escrow_status = 'HELD'",
        [],
        |row| row.get(0),
    )?)
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let refund_issued_at = rows::opt_time(row, 27)?;
    let refund = match refund_issued_at {
        Some(issued_at) => Some(Refund {
            mode: rows::parsed(row, 22)?,
            amount_cents: row.get(23)?,
            fee_cents: row.get(24)?,
            seller_debit_cents: row.get(25)?,
            reason: rows::parsed(row, 26)?,
            issued_at,
        }),
        None => None,
    };

    Ok(Order {
        id: rows::id(row, 0)?,
        order_code: row.get(1)?,
        listing_id: rows::id(row, 2)?,
        buyer_id: rows::id(row, 3)?,
        seller_id: rows::id(row, 4)?,
        offer_id: rows::opt_id(row, 5)?,
        thread_id: rows::opt_id(row, 6)?,
        status: rows::parsed(row, 7)?,
        status_history: Vec::new(),
        item_price_cents: row.get(8)?,
        shipping_cents: row.get(9)?,
        tax_cents: row.get(10)?,
        total_cents: row.get(11)?,
        shipping_address: rows::opt_json(row, 12)?,
        tracking_number: row.get(13)?,
        carrier: row.get(14)?,
        shipped_at: rows::opt_time(row, 15)?,
        delivered_at: rows::opt_time(row, 16)?,
        escrow: Escrow {
            held_cents: row.get(17)?,
            status: rows::parsed(row, 18)?,
            released_at: rows::opt_time(row, 19)?,
        },
        seller_payout_cents: row.get(20)?,
        platform_fee_cents: row.get(21)?,
        refund,
        listing_snapshot: ListingSnapshot {
            title: row.get(28)?,
            price_cents: row.get(29)?,
            image_url: row.get(30)?,
        },
        created_at: rows::time(row, 31)?,
    })
}
