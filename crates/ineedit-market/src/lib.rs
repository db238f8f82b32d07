//! # ineedit-market
//!
//! The settlement core of the marketplace: offers, orders, escrow, refunds
//! and the conversation log that mirrors them.
//!
//! All operations are synchronous methods on [`Market`]. Each runs in one
//! SQLite transaction on its own connection and either commits every effect
//! (ledger movement, status change, system message) or none of them.
//! Collaborators are injected: a [`Clock`], an [`IdGenerator`] and a
//! [`SearchProjector`] that receives listing documents after commit.

pub mod accounts;
pub mod clock;
pub mod conversation;
pub mod error;
pub mod ids;
pub mod listings;
pub mod market;
pub mod offers;
pub mod orders;
pub mod policy;
pub mod principal;
pub mod projector;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use accounts::NewAccount;
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::{Inbox, SendMessage};
pub use error::{MarketError, Result};
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use listings::NewListing;
pub use market::{Market, MoneySupply};
pub use offers::{AcceptOffer, BroadcastOffer, CreateOffer, CreatePrivateOffer};
pub use orders::{IssueRefund, PurchaseListing};
pub use policy::MarketPolicy;
pub use principal::Principal;
pub use projector::{
    ListingDocument, NoopProjector, ProjectorError, RecordingProjector, SearchProjector,
};
pub use sweeper::SweepReport;
