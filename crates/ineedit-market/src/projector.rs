//! Push side of the listing search index.
//!
//! The market calls [`SearchProjector::upsert_or_remove`] after a listing
//! mutation has committed. Delivery is best effort: an error is logged and
//! never undoes the settlement.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ineedit_shared::{AccountId, ListingId};
use ineedit_store::Listing;

/// The indexed view of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDocument {
    pub id: ListingId,
    pub seller_id: AccountId,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub original_price_cents: Option<i64>,
    pub thumbnail: Option<String>,
    pub is_sold: bool,
    pub is_deleted: bool,
    pub is_draft: bool,
    pub created_at: DateTime<Utc>,
}

impl ListingDocument {
    /// Sold, deleted and draft listings are removed from the index.
    pub fn should_index(&self) -> bool {
        !(self.is_sold || self.is_deleted || self.is_draft)
    }
}

impl From<&Listing> for ListingDocument {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id,
            seller_id: listing.seller_id,
            title: listing.title.clone(),
            description: listing.description.clone(),
            price_cents: listing.price_cents,
            original_price_cents: listing.original_price_cents,
            thumbnail: listing.thumbnail.clone(),
            is_sold: listing.is_sold,
            is_deleted: listing.is_deleted,
            is_draft: listing.is_draft,
            created_at: listing.created_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error("Search index unavailable: {0}")]
    Unavailable(String),
}

pub trait SearchProjector: Send + Sync {
    /// Index `doc` if [`ListingDocument::should_index`], otherwise remove it.
    fn upsert_or_remove(&self, doc: &ListingDocument) -> Result<(), ProjectorError>;
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProjector;

impl SearchProjector for NoopProjector {
    fn upsert_or_remove(&self, _doc: &ListingDocument) -> Result<(), ProjectorError> {
        Ok(())
    }
}

/// Keeps every document it receives, in order.
#[derive(Debug, Default)]
pub struct RecordingProjector {
    seen: Mutex<Vec<ListingDocument>>,
}

impl RecordingProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<ListingDocument> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The latest document pushed for `id`.
    pub fn last_for(&self, id: ListingId) -> Option<ListingDocument> {
        self.documents().into_iter().rev().find(|d| d.id == id)
    }
}

impl SearchProjector for RecordingProjector {
    fn upsert_or_remove(&self, doc: &ListingDocument) -> Result<(), ProjectorError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(doc.clone());
        Ok(())
    }
}
