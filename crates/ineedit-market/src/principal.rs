use serde::{Deserialize, Serialize};

use ineedit_shared::AccountId;

/// The authenticated caller as reported by the identity provider.
///
/// `balance_cents` is the balance at call time. It lets an operation reject
/// an obviously unaffordable request up front; the authoritative check is
/// still the conditional debit inside the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub account_id: AccountId,
    pub balance_cents: i64,
}

impl Principal {
    pub fn new(account_id: AccountId, balance_cents: i64) -> Self {
        Self {
            account_id,
            balance_cents,
        }
    }

    pub fn can_afford(&self, cents: i64) -> bool {
        self.balance_cents >= cents
    }
}
