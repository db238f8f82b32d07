//! Domain model structs persisted in the marketplace database.
//!
//! Entities reference each other only by identifier; joins are explicit
//! lookups in the per-table modules. Every struct derives `Serialize` so it
//! can be handed straight to the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ineedit_shared::{
    AccountId, ArchiveReason, EscrowStatus, ListingId, MessageId, OfferId, OfferMode,
    OfferStatus, OrderId, OrderStatus, RefundMode, RefundReason, ShippingAddress, SystemEvent,
    ThreadId,
};

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// The wallet-holding subset of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    /// Spendable funds. Never negative.
    pub balance_cents: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingOption {
    pub region: String,
    pub cost_cents: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    pub id: ListingId,
    pub seller_id: AccountId,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub original_price_cents: Option<i64>,
    pub thumbnail: Option<String>,
    pub buyer_id: Option<AccountId>,
    pub is_sold: bool,
    pub is_deleted: bool,
    pub is_draft: bool,
    pub is_free_shipping: bool,
    pub can_offer: bool,
    pub shipping_options: Vec<ShippingOption>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Purchasable right now: not sold, deleted or drafted.
    pub fn is_available(&self) -> bool {
        !self.is_sold && !self.is_deleted && !self.is_draft
    }

    /// Shipping charge for `region`, or `None` if no enabled option matches.
    /// Free-shipping listings still require an enabled region.
    pub fn shipping_cents_to(&self, region: &str) -> Option<i64> {
        self.shipping_options
            .iter()
            .find(|o| o.enabled && o.region == region)
            .map(|o| if self.is_free_shipping { 0 } else { o.cost_cents })
    }
}

// ---------------------------------------------------------------------------
// Offer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Offer {
    pub id: OfferId,
    pub listing_id: ListingId,
    pub buyer_id: AccountId,
    pub seller_id: AccountId,
    pub mode: OfferMode,
    pub amount_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    /// Always `amount + shipping + tax`.
    pub total_cents: i64,
    pub shipping_address: Option<ShippingAddress>,
    pub status: OfferStatus,
    /// The buyer's balance currently carries a debit of `total_cents` for
    /// this offer.
    pub funds_held: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Offer {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusChange {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Escrow {
    /// Cents still owed to the seller or buyer; reduced by pre-release
    /// refunds.
    pub held_cents: i64,
    pub status: EscrowStatus,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Refund {
    pub mode: RefundMode,
    pub amount_cents: i64,
    /// Portion of the refund the platform absorbed (refund minus what was
    /// clawed back from the seller after release).
    pub fee_cents: i64,
    pub seller_debit_cents: i64,
    pub reason: RefundReason,
    pub issued_at: DateTime<Utc>,
}

/// Listing details frozen at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingSnapshot {
    pub title: String,
    pub price_cents: i64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    /// Human-facing order number.
    pub order_code: String,
    pub listing_id: ListingId,
    pub buyer_id: AccountId,
    pub seller_id: AccountId,
    pub offer_id: Option<OfferId>,
    pub thread_id: Option<ThreadId>,
    pub status: OrderStatus,
    pub status_history: Vec<StatusChange>,
    pub item_price_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub shipping_address: Option<ShippingAddress>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub escrow: Escrow,
    /// Net credited to the seller at release.
    pub seller_payout_cents: Option<i64>,
    pub platform_fee_cents: Option<i64>,
    pub refund: Option<Refund>,
    pub listing_snapshot: ListingSnapshot,
    pub created_at: DateTime<Utc>,
}

/// Column values for a freshly created order; history and escrow start in
/// their initial states.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub order_code: String,
    pub listing_id: ListingId,
    pub buyer_id: AccountId,
    pub seller_id: AccountId,
    pub offer_id: Option<OfferId>,
    pub thread_id: Option<ThreadId>,
    pub item_price_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub shipping_address: Option<ShippingAddress>,
    pub listing_snapshot: ListingSnapshot,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Thread / Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    pub listing_id: ListingId,
    pub buyer_id: AccountId,
    pub seller_id: AccountId,
    pub last_message_id: Option<MessageId>,
    pub last_message_at: DateTime<Utc>,
    pub archived_reason: Option<ArchiveReason>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn is_participant(&self, account: AccountId) -> bool {
        self.buyer_id == account || self.seller_id == account
    }
}

/// Read-optimized copy of an offer embedded in its `offer` message. Only
/// `status` changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfferSnapshot {
    pub offer_id: OfferId,
    pub mode: OfferMode,
    pub amount_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub list_price_cents: i64,
    pub status: OfferStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OfferSnapshot {
    pub fn of(offer: &Offer, list_price_cents: i64) -> Self {
        Self {
            offer_id: offer.id,
            mode: offer.mode,
            amount_cents: offer.amount_cents,
            shipping_cents: offer.shipping_cents,
            tax_cents: offer.tax_cents,
            total_cents: offer.total_cents,
            list_price_cents,
            status: offer.status,
            expires_at: offer.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        content: String,
    },
    Offer {
        snapshot: OfferSnapshot,
    },
    System {
        event: SystemEvent,
        order_id: Option<OrderId>,
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub account_id: AccountId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub listing_id: ListingId,
    pub sender_id: Option<AccountId>,
    pub body: MessageBody,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

/// Inbox row: a thread plus how many of its messages the viewer has not
/// read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboxEntry {
    pub thread: Thread,
    pub unread_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformRevenue {
    pub total_revenue_cents: i64,
    pub total_transactions: i64,
}
