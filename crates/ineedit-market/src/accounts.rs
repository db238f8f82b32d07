use serde::{Deserialize, Serialize};
use tracing::info;

use ineedit_store::{accounts, Account};

use crate::error::{MarketError, OrNotFound, Result};
use crate::market::Market;
use crate::principal::Principal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub display_name: String,
    #[serde(default)]
    pub opening_balance_cents: i64,
}

impl Market {
    /// Open a wallet with a seeded balance.
    pub fn create_account(&self, req: NewAccount) -> Result<Account> {
        let display_name = req.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(MarketError::InvalidRequest("display_name is required".into()));
        }
        if req.opening_balance_cents < 0 {
            return Err(MarketError::InvalidAmount(
                "opening balance cannot be negative".into(),
            ));
        }

        let account = Account {
            id: self.ids.account_id(),
            display_name,
            balance_cents: req.opening_balance_cents,
            created_at: self.now(),
        };
        self.write("create_account", |tx| Ok(accounts::insert(tx, &account)?))?;

        info!(
            account_id = %account.id,
            balance_cents = account.balance_cents,
            "account created"
        );
        Ok(account)
    }

    pub fn account(&self, principal: &Principal) -> Result<Account> {
        let db = self.open()?;
        accounts::get(db.conn(), principal.account_id).or_not_found("account")
    }
}
