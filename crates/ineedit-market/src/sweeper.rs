//! Expiry sweeper.
//!
//! Each overdue offer is expired in its own transaction, so one failure
//! never blocks the rest of the batch. An offer that an accept or decline
//! closed first is counted as skipped.

use serde::Serialize;
use tracing::{info, warn};

use ineedit_store::offers;

use crate::error::Result;
use crate::market::Market;
use crate::offers::expire_one;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Buyer funds returned by this sweep.
    pub released_cents: i64,
}

impl Market {
    pub fn sweep_expired_offers(&self) -> Result<SweepReport> {
        let now = self.now();
        let due = {
            let db = self.open()?;
            offers::due_for_expiry(db.conn(), now, None)?
        };

        let mut report = SweepReport::default();
        for offer in due {
            match self.write("expire_offer", |tx| expire_one(tx, self.ids.as_ref(), offer.id, now)) {
                Ok(Some(expired)) => {
                    report.expired += 1;
                    if expired.funds_held {
                        report.released_cents += expired.total_cents;
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(offer_id = %offer.id, error = %e, "offer expiry failed");
                }
            }
        }

        if report.expired + report.failed > 0 {
            info!(
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                released_cents = report.released_cents,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }
}
