use ineedit_shared::RefundReason;
use ineedit_store::StoreError;
use thiserror::Error;

/// Failures surfaced by settlement operations.
///
/// Every variant except [`MarketError::Store`] is a precondition that was
/// checked inside the operation's transaction; returning it rolls the whole
/// transaction back.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Insufficient funds: {needed_cents} cents required")]
    InsufficientFunds { needed_cents: i64 },

    #[error("Listing already sold")]
    AlreadySold,

    #[error("Listing is not available")]
    ListingUnavailable,

    #[error("Offer is no longer pending")]
    OfferNotPending,

    #[error("Offer has expired")]
    OfferExpired,

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Price out of bounds: {0}")]
    OutOfPriceBounds(String),

    #[error("A pending offer already exists")]
    DuplicateOffer,

    #[error("An order already exists for this listing")]
    DuplicateOrder,

    #[error("Shipping not available to the buyer's region")]
    ShippingUnavailable,

    #[error("Refund reason {0} is not allowed once the order has shipped")]
    InvalidRefundReason(RefundReason),

    #[error("Order has already been refunded")]
    AlreadyRefunded,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No users have favorited this listing")]
    NoRecipients,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MarketError {
    /// Stable machine-readable tag for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::InsufficientFunds { .. } => "insufficient_funds",
            MarketError::AlreadySold => "already_sold",
            MarketError::ListingUnavailable => "listing_unavailable",
            MarketError::OfferNotPending => "offer_not_pending",
            MarketError::OfferExpired => "offer_expired",
            MarketError::Forbidden(_) => "forbidden",
            MarketError::InvalidAmount(_) => "invalid_amount",
            MarketError::OutOfPriceBounds(_) => "out_of_price_bounds",
            MarketError::DuplicateOffer => "duplicate_offer",
            MarketError::DuplicateOrder => "duplicate_order",
            MarketError::ShippingUnavailable => "shipping_unavailable",
            MarketError::InvalidRefundReason(_) => "invalid_refund_reason",
            MarketError::AlreadyRefunded => "already_refunded",
            MarketError::NotFound(_) => "not_found",
            MarketError::InvalidRequest(_) => "invalid_request",
            MarketError::NoRecipients => "no_recipients",
            MarketError::Store(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;

/// Turn the store's generic not-found into a named one.
pub(crate) trait OrNotFound<T> {
    fn or_not_found(self, what: &'static str) -> Result<T>;
}

impl<T> OrNotFound<T> for ineedit_store::Result<T> {
    fn or_not_found(self, what: &'static str) -> Result<T> {
        self.map_err(|e| match e {
            StoreError::NotFound => MarketError::NotFound(what),
            other => MarketError::Store(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_is_named() {
        let r: ineedit_store::Result<()> = Err(StoreError::NotFound);
        let err = r.or_not_found("offer").unwrap_err();
        assert!(matches!(err, MarketError::NotFound("offer")));
        assert_eq!(err.to_string(), "offer not found");
    }

    #[test]
    fn refund_reason_renders_in_message() {
        let err = MarketError::InvalidRefundReason(RefundReason::NoLongerHaveItem);
        assert!(err.to_string().contains("no_longer_have_item"));
        assert_eq!(err.code(), "invalid_refund_reason");
    }
}
