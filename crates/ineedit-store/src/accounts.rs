//! Accounts and the balance ledger.
//!
//! Balances change only through [`credit`] and [`try_debit`], each a single
//! `UPDATE` statement. A debit's sufficiency check is part of the `WHERE`
//! clause, so two concurrent debits can never both pass against the same
//! funds.

use rusqlite::{params, Connection, OptionalExtension};

use ineedit_shared::AccountId;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Account, PlatformRevenue};
use crate::rows;

pub fn insert(conn: &Connection, account: &Account) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (id, display_name, balance_cents, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            account.id.to_string(),
            account.display_name,
            account.balance_cents,
            rows::ts(&account.created_at),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: AccountId) -> Result<Account> {
    conn.query_row(
        "SELECT id, display_name, balance_cents, created_at FROM accounts WHERE id = ?1",
        params![id.to_string()],
        row_to_account,
    )
    .map_err(not_found)
}

pub fn balance(conn: &Connection, id: AccountId) -> Result<i64> {
    conn.query_row(
        "SELECT balance_cents FROM accounts WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )
    .map_err(not_found)
}

/// Add `amount_cents` to the account. Fails only if the account is missing.
pub fn credit(conn: &Connection, id: AccountId, amount_cents: i64) -> Result<()> {
    debug_assert!(amount_cents >= 0, "credit of a negative amount");
    let affected = conn.execute(
        "UPDATE accounts SET balance_cents = balance_cents + ?1 WHERE id = ?2",
        params![amount_cents, id.to_string()],
    )?;
    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Subtract `amount_cents` only if the balance covers it.
///
/// Returns `Ok(false)` (and writes nothing) when funds are insufficient or
/// the account does not exist.
pub fn try_debit(conn: &Connection, id: AccountId, amount_cents: i64) -> Result<bool> {
    debug_assert!(amount_cents >= 0, "debit of a negative amount");
    let affected = conn.execute(
        "UPDATE accounts SET balance_cents = balance_cents - ?1
         WHERE id = ?2 AND balance_cents >= ?1",
        params![amount_cents, id.to_string()],
    )?;
    Ok(affected == 1)
}

pub fn exists(conn: &Connection, id: AccountId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Sum of every account balance.
pub fn total_balances(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(balance_cents), 0) FROM accounts",
        [],
        |row| row.get(0),
    )?)
}

// ---------------------------------------------------------------------------
// Platform revenue
// ---------------------------------------------------------------------------

pub fn platform_revenue(conn: &Connection) -> Result<PlatformRevenue> {
    Ok(conn.query_row(
        "SELECT total_revenue_cents, total_transactions FROM platform_revenue WHERE id = 1",
        [],
        |row| {
            Ok(PlatformRevenue {
                total_revenue_cents: row.get(0)?,
                total_transactions: row.get(1)?,
            })
        },
    )?)
}

/// Adjust platform revenue by `delta_cents` (negative when the platform
/// absorbs part of a refund). `settled` counts one completed sale.
pub fn record_platform_revenue(conn: &Connection, delta_cents: i64, settled: bool) -> Result<()> {
    conn.execute(
        "UPDATE platform_revenue
         SET total_revenue_cents = total_revenue_cents + ?1,
             total_transactions = total_transactions + ?2
         WHERE id = 1",
        params![delta_cents, i64::from(settled)],
    )?;
    Ok(())
}

impl Database {
    pub fn create_account(&self, account: &Account) -> Result<()> {
        insert(self.conn(), account)
    }

    pub fn get_account(&self, id: AccountId) -> Result<Account> {
        get(self.conn(), id)
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: rows::id(row, 0)?,
        display_name: row.get(1)?,
        balance_cents: row.get(2)?,
        created_at: rows::time(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("ledger.db")).unwrap();
        (dir, db)
    }

    fn account(db: &Database, balance_cents: i64) -> AccountId {
        let id = AccountId::new();
        db.create_account(&Account {
            id,
            display_name: "someone".into(),
            balance_cents,
            created_at: Utc::now(),
        })
        .unwrap();
        id
    }

    #[test]
    fn debit_succeeds_when_covered() {
        let (_dir, db) = open();
        let id = account(&db, 5_000);

        assert!(try_debit(db.conn(), id, 5_000).unwrap());
        assert_eq!(balance(db.conn(), id).unwrap(), 0);
    }

    #[test]
    fn debit_refuses_overdraft_and_writes_nothing() {
        let (_dir, db) = open();
        let id = account(&db, 4_999);

        assert!(!try_debit(db.conn(), id, 5_000).unwrap());
        assert_eq!(balance(db.conn(), id).unwrap(), 4_999);
    }

    #[test]
    fn debit_of_unknown_account_is_refused() {
        let (_dir, db) = open();
        assert!(!try_debit(db.conn(), AccountId::new(), 1).unwrap());
    }

    #[test]
    fn credit_of_unknown_account_is_not_found() {
        let (_dir, db) = open();
        assert!(matches!(
            credit(db.conn(), AccountId::new(), 1),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn platform_revenue_accumulates() {
        let (_dir, db) = open();
        record_platform_revenue(db.conn(), 900, true).unwrap();
        record_platform_revenue(db.conn(), -100, false).unwrap();

        let revenue = platform_revenue(db.conn()).unwrap();
        assert_eq!(revenue.total_revenue_cents, 800);
        assert_eq!(revenue.total_transactions, 1);
    }
}
