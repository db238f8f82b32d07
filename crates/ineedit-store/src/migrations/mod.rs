//! Schema migrations, tracked with `PRAGMA user_version`.
//!
//! Pending steps run inside one `BEGIN IMMEDIATE` transaction, so when
//! several connections open a fresh file at once exactly one of them
//! applies the schema and the others see the bumped version.

pub mod v001_initial;
pub mod v002_settlement;

use rusqlite::{Connection, TransactionBehavior};

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered steps; the version after applying `MIGRATIONS[i]` is `i + 1`.
const MIGRATIONS: &[(&str, Step)] = &[
    ("v001_initial", v001_initial::up),
    ("v002_settlement", v002_settlement::up),
];

fn user_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(usize::try_from(version).unwrap_or(0))
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    if user_version(conn)? >= MIGRATIONS.len() {
        return Ok(());
    }

    let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let current = user_version(&tx)?;
    for (version, (name, up)) in MIGRATIONS.iter().enumerate().skip(current) {
        tracing::info!(migration = name, "applying database migration");
        up(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version as i64 + 1)?;
    }
    tx.commit()?;
    Ok(())
}
