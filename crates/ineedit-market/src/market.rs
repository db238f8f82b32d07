//! The settlement engine handle.
//!
//! A [`Market`] owns no connection. Each operation opens its own connection
//! to the database file and runs inside one `BEGIN IMMEDIATE` transaction,
//! so any number of threads can share one `Market` and race freely; the
//! conditional writes in `ineedit_store` decide the winners.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use ineedit_shared::AccountId;
use ineedit_store::{accounts, offers, orders, Database, Listing, Transaction};

use crate::clock::{Clock, SystemClock};
use crate::error::{OrNotFound, Result};
use crate::ids::{IdGenerator, RandomIds};
use crate::policy::MarketPolicy;
use crate::principal::Principal;
use crate::projector::{ListingDocument, NoopProjector, SearchProjector};

pub struct Market {
    db_path: PathBuf,
    policy: MarketPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    projector: Arc<dyn SearchProjector>,
}

impl Market {
    /// A market over the database at `db_path` with the default policy, the
    /// system clock, random ids and no search projector.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            policy: MarketPolicy::default(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
            projector: Arc::new(NoopProjector),
        }
    }

    pub fn with_policy(mut self, policy: MarketPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_projector(mut self, projector: Arc<dyn SearchProjector>) -> Self {
        self.projector = projector;
        self
    }

    pub fn policy(&self) -> &MarketPolicy {
        &self.policy
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a fresh, migrated connection.
    pub fn open(&self) -> Result<Database> {
        Ok(Database::open_at(&self.db_path)?)
    }

    /// Build the principal for `account` from its current balance.
    pub fn principal(&self, account: AccountId) -> Result<Principal> {
        let db = self.open()?;
        let balance = accounts::balance(db.conn(), account).or_not_found("account")?;
        Ok(Principal::new(account, balance))
    }

    /// Snapshot of where every cent currently sits.
    pub fn money_supply(&self) -> Result<MoneySupply> {
        let db = self.open()?;
        let conn = db.conn();
        Ok(MoneySupply {
            balances_cents: accounts::total_balances(conn)?,
            escrow_held_cents: orders::total_escrow_held(conn)?,
            offer_holds_cents: offers::total_held(conn)?,
            platform_revenue_cents: accounts::platform_revenue(conn)?.total_revenue_cents,
        })
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` in one immediate transaction. `Ok` commits; `Err` drops the
    /// transaction, rolling back every write made through it.
    pub(crate) fn write<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut db = self.open()?;
        let tx = db.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(ineedit_store::StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                debug!(op, error = %e, "rolled back");
                Err(e)
            }
        }
    }

    /// Push the committed state of `listing` to the search index.
    pub(crate) fn project(&self, listing: &Listing) {
        let doc = ListingDocument::from(listing);
        if let Err(e) = self.projector.upsert_or_remove(&doc) {
            warn!(listing_id = %listing.id, error = %e, "search projection failed");
        }
    }
}

/// Totals used to check that settlement neither creates nor destroys money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MoneySupply {
    pub balances_cents: i64,
    pub escrow_held_cents: i64,
    pub offer_holds_cents: i64,
    pub platform_revenue_cents: i64,
}

impl MoneySupply {
    pub fn total_cents(&self) -> i64 {
        self.balances_cents
            + self.escrow_held_cents
            + self.offer_holds_cents
            + self.platform_revenue_cents
    }
}
