//! Identifier generation.
//!
//! Entity ids, human-facing order codes and carrier tracking numbers all come
//! from one [`IdGenerator`], so tests can make them deterministic.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use uuid::Uuid;

use ineedit_shared::{AccountId, ListingId, MessageId, OfferId, OrderId, ThreadId};

pub trait IdGenerator: Send + Sync {
    fn uuid(&self) -> Uuid;

    /// Customer-facing order number.
    fn order_code(&self) -> String;

    fn tracking_number(&self) -> String;

    fn account_id(&self) -> AccountId {
        AccountId::from(self.uuid())
    }

    fn listing_id(&self) -> ListingId {
        ListingId::from(self.uuid())
    }

    fn offer_id(&self) -> OfferId {
        OfferId::from(self.uuid())
    }

    fn order_id(&self) -> OrderId {
        OrderId::from(self.uuid())
    }

    fn thread_id(&self) -> ThreadId {
        ThreadId::from(self.uuid())
    }

    fn message_id(&self) -> MessageId {
        MessageId::from(self.uuid())
    }
}

/// UUID v4 ids and random numeric codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn uuid(&self) -> Uuid {
        Uuid::new_v4()
    }

    fn order_code(&self) -> String {
        let n: u64 = rand::thread_rng().gen_range(0..10_000_000_000);
        format!("ORD-{n:010}")
    }

    fn tracking_number(&self) -> String {
        let n: u64 = rand::thread_rng().gen_range(0..10_000_000_000_000_000);
        format!("1Z{n:016}")
    }
}

/// Monotonic ids for tests: `00000000-0000-0000-0000-000000000001`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl IdGenerator for SequentialIds {
    fn uuid(&self) -> Uuid {
        Uuid::from_u128(u128::from(self.bump()))
    }

    fn order_code(&self) -> String {
        format!("ORD-{:010}", self.bump())
    }

    fn tracking_number(&self) -> String {
        format!("1Z{:016}", self.bump())
    }
}
