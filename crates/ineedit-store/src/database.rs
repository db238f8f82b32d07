//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Every settlement operation
//! opens its own connection and runs inside one `BEGIN IMMEDIATE`
//! transaction; concurrent writers queue on SQLite's write lock for up to
//! [`BUSY_TIMEOUT`] instead of failing with `SQLITE_BUSY`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::migrations;

/// How long a connection waits for the write lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Default on-disk location of the marketplace database.
    ///
    /// - Linux:   `~/.local/share/ineedit/ineedit.db`
    /// - macOS:   `~/Library/Application Support/com.ineedit.ineedit/ineedit.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\ineedit\ineedit\data\ineedit.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "ineedit", "ineedit").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("ineedit.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        tracing::debug!(path = %path.display(), "database connection opened");

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Read helpers in this crate take `&Connection`, so they work against
    /// both a plain connection and an open [`Transaction`].
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start a write transaction that takes SQLite's RESERVED lock up front.
    ///
    /// Dropping the returned transaction without calling `commit` rolls back
    /// every write made through it.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());

        // Reopening an already-migrated file is a no-op.
        drop(db);
        Database::open_at(&path).expect("should reopen");
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("test.db")).unwrap();

        {
            let tx = db.transaction().unwrap();
            tx.execute(
                "UPDATE platform_revenue SET total_revenue_cents = 42 WHERE id = 1",
                [],
            )
            .unwrap();
        }

        let total: i64 = db
            .conn()
            .query_row(
                "SELECT total_revenue_cents FROM platform_revenue WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(total, 0);
    }
}
