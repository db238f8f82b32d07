use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseEnumError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// A wallet-holding user.
    AccountId
);
id_type!(ListingId);
id_type!(OfferId);
id_type!(OrderId);
id_type!(
    /// The conversation for one (listing, buyer, seller) triple.
    ThreadId
);
id_type!(MessageId);

// ---------------------------------------------------------------------------
// Closed enumerations
// ---------------------------------------------------------------------------

/// Declares a fieldless enum whose wire and storage form is a fixed string.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Who proposed the offer and how it was addressed.
    pub enum OfferMode {
        /// Buyer proposes a price; funds are held at creation.
        Buyer => "buyer",
        /// Seller proposes a price to one buyer; funds move at acceptance.
        SellerPrivate => "seller_private",
        /// Seller proposes a price to everyone who favorited the listing.
        SellerBroadcast => "seller_broadcast",
    }
}

impl OfferMode {
    pub fn is_seller_initiated(&self) -> bool {
        !matches!(self, OfferMode::Buyer)
    }
}

string_enum! {
    pub enum OfferStatus {
        Pending => "pending",
        Accepted => "accepted",
        Declined => "declined",
        Expired => "expired",
    }
}

impl OfferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }
}

string_enum! {
    pub enum OrderStatus {
        Paid => "PAID",
        Shipped => "SHIPPED",
        Delivered => "DELIVERED",
        Canceled => "CANCELED",
    }
}

impl OrderStatus {
    /// Next state on the shipping path, `None` at the end of it.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Paid => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Canceled => None,
        }
    }

    /// Position on the linear shipping path. Canceled is off-path.
    pub fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Paid => Some(0),
            OrderStatus::Shipped => Some(1),
            OrderStatus::Delivered => Some(2),
            OrderStatus::Canceled => None,
        }
    }

    pub fn has_shipped(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Delivered)
    }
}

string_enum! {
    pub enum EscrowStatus {
        Held => "HELD",
        Released => "RELEASED",
    }
}

string_enum! {
    pub enum MessageKind {
        Text => "text",
        Offer => "offer",
        System => "system",
    }
}

string_enum! {
    /// Tag on a system message mirroring a settlement transition.
    pub enum SystemEvent {
        OrderCreated => "order_created",
        OrderShipped => "order_shipped",
        OrderDelivered => "order_delivered",
        PayoutReleased => "payout_released",
        RefundIssued => "refund_issued",
        OfferDeclined => "offer_declined",
        OfferExpired => "offer_expired",
    }
}

string_enum! {
    pub enum RefundMode {
        Full => "full",
        Partial => "partial",
    }
}

string_enum! {
    pub enum RefundReason {
        NoLongerHaveItem => "no_longer_have_item",
        DoNotShipInternationally => "do_not_ship_internationally",
        NoLongerWantToSell => "no_longer_want_to_sell",
        ItemNotAsDescribed => "item_not_as_described",
        DamagedInTransit => "damaged_in_transit",
        LostInTransit => "lost_in_transit",
        BuyerRequested => "buyer_requested",
        Other => "other",
    }
}

impl RefundReason {
    /// Reasons that only make sense while the item is still with the seller.
    pub fn allowed_after_shipment(&self) -> bool {
        !matches!(
            self,
            RefundReason::NoLongerHaveItem
                | RefundReason::DoNotShipInternationally
                | RefundReason::NoLongerWantToSell
        )
    }
}

string_enum! {
    /// How a buyer funds a seller-initiated offer at acceptance.
    pub enum FundingMethod {
        Wallet => "wallet",
    }
}

string_enum! {
    pub enum ArchiveReason {
        SoldToOther => "sold_to_other",
        ListingDeleted => "listing_deleted",
    }
}

string_enum! {
    pub enum PartyRole {
        Buyer => "buyer",
        Seller => "seller",
    }
}
