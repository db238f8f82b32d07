//! Orders: direct purchase, the PAID -> SHIPPED -> DELIVERED path, escrow
//! release and the single refund an order may carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use ineedit_shared::money::{platform_fee_cents, seller_net_cents};
use ineedit_shared::{
    AccountId, ArchiveReason, EscrowStatus, ListingId, OfferId, OrderId, OrderStatus, PartyRole,
    RefundMode, RefundReason, ShippingAddress, SystemEvent,
};
use ineedit_store::{
    accounts, listings, orders, Connection, Listing, ListingSnapshot, NewOrder, Order, Refund,
};

use crate::conversation::{open_thread, post_order_event};
use crate::error::{MarketError, OrNotFound, Result};
use crate::ids::IdGenerator;
use crate::market::Market;
use crate::offers::{check_address, close_listing, debit, shipping_for};
use crate::policy::MarketPolicy;
use crate::principal::Principal;

const CARRIER: &str = "UPS";

/// Everything needed to open an order once the buyer has paid and the
/// listing is reserved.
pub(crate) struct Sale<'a> {
    pub listing: &'a Listing,
    pub buyer: AccountId,
    pub offer_id: Option<OfferId>,
    pub item_price_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub shipping_address: Option<ShippingAddress>,
    pub actor: AccountId,
}

/// Insert a PAID order for a reserved listing, announce it, and close every
/// other negotiation on the listing.
pub(crate) fn open_order(
    conn: &Connection,
    ids: &dyn IdGenerator,
    sale: Sale<'_>,
    now: DateTime<Utc>,
) -> Result<Order> {
    let listing = sale.listing;
    let thread = open_thread(conn, ids, listing.id, sale.buyer, listing.seller_id, now)?;
    let new = NewOrder {
        id: ids.order_id(),
        order_code: ids.order_code(),
        listing_id: listing.id,
        buyer_id: sale.buyer,
        seller_id: listing.seller_id,
        offer_id: sale.offer_id,
        thread_id: Some(thread.id),
        item_price_cents: sale.item_price_cents,
        shipping_cents: sale.shipping_cents,
        tax_cents: sale.tax_cents,
        total_cents: sale.item_price_cents + sale.shipping_cents + sale.tax_cents,
        shipping_address: sale.shipping_address,
        listing_snapshot: ListingSnapshot {
            title: listing.title.clone(),
            price_cents: listing.price_cents,
            image_url: listing.thumbnail.clone(),
        },
        created_at: now,
    };
    orders::insert(conn, &new).map_err(|e| {
        if e.is_constraint_violation() {
            MarketError::DuplicateOrder
        } else {
            e.into()
        }
    })?;

    let order = orders::get(conn, new.id)?;
    post_order_event(
        conn,
        ids,
        &order,
        SystemEvent::OrderCreated,
        Some(sale.actor),
        json!({
            "order_code": order.order_code,
            "offer_id": order.offer_id,
            "total_cents": order.total_cents,
            "title": order.listing_snapshot.title,
        }),
        now,
    )?;
    close_listing(conn, ids, listing.id, Some(sale.buyer), ArchiveReason::SoldToOther, now)?;
    Ok(order)
}

/// PAID -> SHIPPED. The tracking number is minted once; a replay keeps it.
fn ship(conn: &Connection, ids: &dyn IdGenerator, order: &Order, now: DateTime<Utc>) -> Result<()> {
    let tracking = order
        .tracking_number
        .clone()
        .unwrap_or_else(|| ids.tracking_number());
    if orders::mark_shipped(conn, order.id, &tracking, CARRIER, now)? {
        let shipped = orders::get(conn, order.id)?;
        post_order_event(
            conn,
            ids,
            &shipped,
            SystemEvent::OrderShipped,
            None,
            json!({ "tracking_number": shipped.tracking_number, "carrier": shipped.carrier }),
            now,
        )?;
    }
    Ok(())
}

/// Delivery settlement. Safe to re-run: the escrow release, the seller
/// credit and both events each apply at most once per order.
fn settle_delivery(
    conn: &Connection,
    ids: &dyn IdGenerator,
    policy: &MarketPolicy,
    order: &Order,
    now: DateTime<Utc>,
) -> Result<()> {
    post_order_event(
        conn,
        ids,
        order,
        SystemEvent::OrderDelivered,
        None,
        json!({ "delivered_at": order.delivered_at }),
        now,
    )?;

    if order.escrow.status == EscrowStatus::Held {
        let net = seller_net_cents(
            order.item_price_cents,
            order.shipping_cents,
            order.tax_cents,
            policy.platform_fee_bps,
        );
        let refunded = order.refund.as_ref().map_or(0, |r| r.amount_cents);
        let payout = (net - refunded).max(0).min(order.escrow.held_cents);
        let fee = platform_fee_cents(order.item_price_cents, policy.platform_fee_bps);

        if orders::release_escrow(conn, order.id, payout, fee, now)? {
            accounts::credit(conn, order.seller_id, payout)?;
            // Fee, shipping and tax stay with the platform.
            accounts::record_platform_revenue(conn, order.escrow.held_cents - payout, true)?;
            info!(
                order_id = %order.id,
                seller_id = %order.seller_id,
                payout_cents = payout,
                platform_fee_cents = fee,
                "escrow released"
            );
        }
    }

    let settled = orders::get(conn, order.id)?;
    if let Some(payout) = settled.seller_payout_cents {
        post_order_event(
            conn,
            ids,
            &settled,
            SystemEvent::PayoutReleased,
            None,
            json!({
                "payout_cents": payout,
                "platform_fee_cents": settled.platform_fee_cents,
            }),
            now,
        )?;
    }
    Ok(())
}

fn party_to(order: &Order, principal: &Principal) -> Result<()> {
    if order.buyer_id != principal.account_id && order.seller_id != principal.account_id {
        return Err(MarketError::Forbidden("not a party to this order"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseListing {
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub tax_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRefund {
    pub mode: RefundMode,
    /// Required for partial refunds; ignored for full ones.
    #[serde(default)]
    pub amount_cents: Option<i64>,
    pub reason: RefundReason,
}

impl Market {
    /// Buy a listing outright at its list price.
    pub fn purchase_listing(
        &self,
        principal: &Principal,
        listing_id: ListingId,
        req: PurchaseListing,
    ) -> Result<Order> {
        check_address(&req.shipping_address)?;
        if req.tax_cents < 0 {
            return Err(MarketError::InvalidAmount("tax cannot be negative".into()));
        }
        let me = principal.account_id;
        let now = self.now();

        let (order, sold) = self.write("purchase_listing", |tx| {
            let listing = listings::get(tx, listing_id).or_not_found("listing")?;
            if listing.is_sold {
                return Err(MarketError::AlreadySold);
            }
            if !listing.is_available() {
                return Err(MarketError::ListingUnavailable);
            }
            if listing.seller_id == me {
                return Err(MarketError::Forbidden("cannot buy your own listing"));
            }

            let shipping_cents = shipping_for(&listing)?;
            let total_cents = listing.price_cents + shipping_cents + req.tax_cents;
            debit(tx, principal, me, total_cents)?;
            if !listings::reserve_for_sale(tx, listing.id, me, now)? {
                return Err(MarketError::AlreadySold);
            }

            let order = open_order(
                tx,
                self.ids.as_ref(),
                Sale {
                    listing: &listing,
                    buyer: me,
                    offer_id: None,
                    item_price_cents: listing.price_cents,
                    shipping_cents,
                    tax_cents: req.tax_cents,
                    shipping_address: Some(req.shipping_address.clone()),
                    actor: me,
                },
                now,
            )?;
            Ok((order, listings::get(tx, listing.id)?))
        })?;

        info!(
            order_id = %order.id,
            listing_id = %listing_id,
            buyer_id = %me,
            total_cents = order.total_cents,
            "listing purchased; escrow held"
        );
        self.project(&sold);
        Ok(order)
    }

    /// Move an order along the shipping path.
    ///
    /// With no `target` the order takes one step; `DELIVERED` walks through
    /// `SHIPPED` if needed. Re-advancing a delivered order re-runs the
    /// (idempotent) settlement; a canceled order is left as is.
    pub fn advance_order(
        &self,
        principal: &Principal,
        id: OrderId,
        target: Option<OrderStatus>,
    ) -> Result<Order> {
        if let Some(t) = target {
            if !matches!(t, OrderStatus::Shipped | OrderStatus::Delivered) {
                return Err(MarketError::InvalidRequest(
                    "target must be SHIPPED or DELIVERED".into(),
                ));
            }
        }
        let now = self.now();
        let ids = self.ids.as_ref();

        let order = self.write("advance_order", |tx| {
            let order = orders::get(tx, id).or_not_found("order")?;
            party_to(&order, principal)?;
            if order.status == OrderStatus::Canceled {
                debug!(order_id = %id, "advance on canceled order ignored");
                return Ok(order);
            }

            let target = target
                .or_else(|| order.status.next())
                .unwrap_or(order.status);

            if order.status == OrderStatus::Paid {
                ship(tx, ids, &order, now)?;
            }
            let order = orders::get(tx, id)?;
            if order.status == OrderStatus::Shipped
                && target == OrderStatus::Delivered
                && orders::mark_delivered(tx, id, now)?
            {
                info!(order_id = %id, "order delivered");
            }
            let order = orders::get(tx, id)?;
            if order.status == OrderStatus::Delivered {
                settle_delivery(tx, ids, self.policy(), &order, now)?;
            }
            Ok(orders::get(tx, id)?)
        })?;

        info!(order_id = %id, status = %order.status, "order advanced");
        Ok(order)
    }

    /// Seller-issued refund, at most one per order.
    pub fn issue_refund(&self, principal: &Principal, id: OrderId, req: IssueRefund) -> Result<Order> {
        if req.mode == RefundMode::Partial {
            match req.amount_cents {
                Some(a) if a > 0 => {}
                _ => {
                    return Err(MarketError::InvalidAmount(
                        "partial refunds need a positive amount_cents".into(),
                    ))
                }
            }
        }
        let me = principal.account_id;
        let now = self.now();

        let order = self.write("issue_refund", |tx| {
            let order = orders::get(tx, id).or_not_found("order")?;
            if order.seller_id != me {
                return Err(MarketError::Forbidden("only the seller can refund"));
            }
            if order.refund.is_some() {
                return Err(MarketError::AlreadyRefunded);
            }
            if order.status.has_shipped() && !req.reason.allowed_after_shipment() {
                return Err(MarketError::InvalidRefundReason(req.reason));
            }

            let amount = match (req.mode, req.amount_cents) {
                (RefundMode::Partial, Some(a)) if a <= order.total_cents => a,
                (RefundMode::Partial, _) => {
                    return Err(MarketError::InvalidAmount(format!(
                        "refund cannot exceed the {} cents paid",
                        order.total_cents
                    )))
                }
                (RefundMode::Full, _) => order.total_cents,
            };

            let seller_debit = match order.escrow.status {
                EscrowStatus::Released => {
                    let clawback = amount.min(order.seller_payout_cents.unwrap_or(0));
                    if !accounts::try_debit(tx, order.seller_id, clawback)? {
                        return Err(MarketError::InsufficientFunds { needed_cents: clawback });
                    }
                    accounts::record_platform_revenue(tx, clawback - amount, false)?;
                    clawback
                }
                EscrowStatus::Held => {
                    if !orders::reduce_escrow(tx, id, amount)? {
                        return Err(MarketError::InvalidAmount(
                            "refund exceeds the escrowed amount".into(),
                        ));
                    }
                    0
                }
            };
            accounts::credit(tx, order.buyer_id, amount)?;

            let refund = Refund {
                mode: req.mode,
                amount_cents: amount,
                fee_cents: match order.escrow.status {
                    EscrowStatus::Released => amount - seller_debit,
                    EscrowStatus::Held => 0,
                },
                seller_debit_cents: seller_debit,
                reason: req.reason,
                issued_at: now,
            };
            if !orders::record_refund(tx, id, &refund)? {
                return Err(MarketError::AlreadyRefunded);
            }
            if amount == order.total_cents && order.status != OrderStatus::Delivered {
                orders::cancel(tx, id, now)?;
            }

            let order = orders::get(tx, id)?;
            post_order_event(
                tx,
                self.ids.as_ref(),
                &order,
                SystemEvent::RefundIssued,
                Some(me),
                json!({
                    "mode": refund.mode,
                    "amount_cents": refund.amount_cents,
                    "seller_debit_cents": refund.seller_debit_cents,
                    "reason": refund.reason,
                }),
                now,
            )?;
            Ok(order)
        })?;

        info!(
            order_id = %id,
            amount_cents = order.refund.as_ref().map_or(0, |r| r.amount_cents),
            status = %order.status,
            "refund issued"
        );
        Ok(order)
    }

    /// Read an order, with its status history, as its buyer or seller.
    pub fn get_order(&self, principal: &Principal, id: OrderId) -> Result<Order> {
        let db = self.open()?;
        let order = orders::get(db.conn(), id).or_not_found("order")?;
        party_to(&order, principal)?;
        Ok(order)
    }

    /// Orders where the caller is `role`, newest first.
    pub fn list_orders(&self, principal: &Principal, role: PartyRole) -> Result<Vec<Order>> {
        let db = self.open()?;
        Ok(orders::list_for_account(db.conn(), principal.account_id, role)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{address, Harness};
    use ineedit_store::{messages, MessageBody};

    fn purchase() -> PurchaseListing {
        PurchaseListing {
            shipping_address: address(),
            tax_cents: 0,
        }
    }

    fn events(h: &Harness, order: &Order) -> Vec<SystemEvent> {
        let db = h.market.open().unwrap();
        let thread = order.thread_id.unwrap();
        messages::list_for_thread(db.conn(), thread)
            .unwrap()
            .into_iter()
            .filter_map(|m| match m.body {
                MessageBody::System { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn purchase_holds_total_in_escrow() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(20_000);
        let listing = h.listing(&seller, 10_000, Some(2_000));

        let order = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.total_cents, 12_000);
        assert_eq!(order.escrow.held_cents, 12_000);
        assert_eq!(order.escrow.status, EscrowStatus::Held);
        assert_eq!(order.listing_snapshot.title, listing.title);
        assert_eq!(h.balance(&buyer), 8_000);
        assert_eq!(events(&h, &order), vec![SystemEvent::OrderCreated]);

        let err = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap_err();
        assert!(matches!(err, MarketError::AlreadySold));
        assert_eq!(h.balance(&buyer), 8_000);
    }

    #[test]
    fn purchase_without_funds_leaves_listing_unsold() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(11_999);
        let listing = h.listing(&seller, 10_000, Some(2_000));

        let err = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientFunds { needed_cents: 12_000 }));
        assert!(!h.market.get_listing(listing.id).unwrap().is_sold);
    }

    #[test]
    fn advance_steps_through_shipping_and_pays_out_once() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(20_000);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let order = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap();
        let bp = h.principal(&buyer);

        let shipped = h.market.advance_order(&bp, order.id, None).unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(shipped.carrier.as_deref(), Some(CARRIER));
        let tracking = shipped.tracking_number.clone().unwrap();

        let delivered = h.market.advance_order(&bp, order.id, None).unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(delivered.tracking_number.as_deref(), Some(tracking.as_str()));
        assert_eq!(delivered.escrow.status, EscrowStatus::Released);
        assert_eq!(delivered.seller_payout_cents, Some(7_100));
        assert_eq!(delivered.platform_fee_cents, Some(900));
        assert_eq!(h.balance(&seller), 7_100);

        let replay = h
            .market
            .advance_order(&bp, order.id, Some(OrderStatus::Delivered))
            .unwrap();
        assert_eq!(replay.status, OrderStatus::Delivered);
        assert_eq!(h.balance(&seller), 7_100);
        assert_eq!(
            events(&h, &order),
            vec![
                SystemEvent::OrderCreated,
                SystemEvent::OrderShipped,
                SystemEvent::OrderDelivered,
                SystemEvent::PayoutReleased,
            ]
        );

        let view = h.market.get_order(&bp, order.id).unwrap();
        let statuses: Vec<_> = view.status_history.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![OrderStatus::Paid, OrderStatus::Shipped, OrderStatus::Delivered]
        );
    }

    #[test]
    fn advance_rejects_paid_target_and_outsiders() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(20_000);
        let stranger = h.account(0);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let order = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap();

        assert!(matches!(
            h.market.advance_order(&h.principal(&seller), order.id, Some(OrderStatus::Paid)),
            Err(MarketError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.market.advance_order(&h.principal(&stranger), order.id, None),
            Err(MarketError::Forbidden(_))
        ));
    }

    #[test]
    fn full_refund_before_shipping_cancels() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(20_000);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let order = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap();

        let refunded = h
            .market
            .issue_refund(
                &h.principal(&seller),
                order.id,
                IssueRefund {
                    mode: RefundMode::Full,
                    amount_cents: None,
                    reason: RefundReason::NoLongerHaveItem,
                },
            )
            .unwrap();
        assert_eq!(refunded.status, OrderStatus::Canceled);
        assert_eq!(refunded.escrow.held_cents, 0);
        assert_eq!(h.balance(&buyer), 20_000);

        let again = h
            .market
            .issue_refund(
                &h.principal(&seller),
                order.id,
                IssueRefund {
                    mode: RefundMode::Partial,
                    amount_cents: Some(100),
                    reason: RefundReason::Other,
                },
            )
            .unwrap_err();
        assert!(matches!(again, MarketError::AlreadyRefunded));

        let advanced = h
            .market
            .advance_order(&h.principal(&buyer), order.id, Some(OrderStatus::Delivered))
            .unwrap();
        assert_eq!(advanced.status, OrderStatus::Canceled);
        assert_eq!(h.balance(&seller), 0);
    }

    #[test]
    fn pre_shipment_reason_is_rejected_after_shipping() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(20_000);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let order = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap();
        h.market.advance_order(&h.principal(&seller), order.id, None).unwrap();

        let err = h
            .market
            .issue_refund(
                &h.principal(&seller),
                order.id,
                IssueRefund {
                    mode: RefundMode::Full,
                    amount_cents: None,
                    reason: RefundReason::NoLongerWantToSell,
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::InvalidRefundReason(RefundReason::NoLongerWantToSell)
        ));
        assert_eq!(h.balance(&buyer), 8_000);
    }

    #[test]
    fn partial_refund_before_delivery_shrinks_payout() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(20_000);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let order = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap();
        let sp = h.principal(&seller);

        h.market
            .issue_refund(
                &sp,
                order.id,
                IssueRefund {
                    mode: RefundMode::Partial,
                    amount_cents: Some(1_000),
                    reason: RefundReason::ItemNotAsDescribed,
                },
            )
            .unwrap();
        assert_eq!(h.balance(&buyer), 9_000);

        let delivered = h
            .market
            .advance_order(&sp, order.id, Some(OrderStatus::Delivered))
            .unwrap();
        assert_eq!(delivered.seller_payout_cents, Some(6_100));
        assert_eq!(h.balance(&seller), 6_100);
    }

    #[test]
    fn only_the_seller_refunds_and_partial_is_capped() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(20_000);
        let listing = h.listing(&seller, 10_000, Some(2_000));
        let order = h
            .market
            .purchase_listing(&h.principal(&buyer), listing.id, purchase())
            .unwrap();

        let refund = |amount| IssueRefund {
            mode: RefundMode::Partial,
            amount_cents: Some(amount),
            reason: RefundReason::Other,
        };
        assert!(matches!(
            h.market.issue_refund(&h.principal(&buyer), order.id, refund(100)),
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            h.market.issue_refund(&h.principal(&seller), order.id, refund(12_001)),
            Err(MarketError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.market.issue_refund(&h.principal(&seller), order.id, refund(0)),
            Err(MarketError::InvalidAmount(_))
        ));
    }

    #[test]
    fn orders_are_listed_by_role() {
        let h = Harness::new();
        let seller = h.account(0);
        let buyer = h.account(50_000);
        for _ in 0..2 {
            let listing = h.listing(&seller, 10_000, Some(2_000));
            h.market
                .purchase_listing(&h.principal(&buyer), listing.id, purchase())
                .unwrap();
        }
        assert_eq!(
            h.market
                .list_orders(&h.principal(&buyer), PartyRole::Buyer)
                .unwrap()
                .len(),
            2
        );
        assert!(h
            .market
            .list_orders(&h.principal(&buyer), PartyRole::Seller)
            .unwrap()
            .is_empty());
        assert_eq!(
            h.market
                .list_orders(&h.principal(&seller), PartyRole::Seller)
                .unwrap()
                .len(),
            2
        );
    }
}
