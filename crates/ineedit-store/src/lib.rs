//! # ineedit-store
//!
//! SQLite persistence for the marketplace, via `rusqlite`.
//!
//! The crate exposes a synchronous [`Database`] handle plus per-table modules
//! whose functions take a `&Connection`. Passing an open
//! [`rusqlite::Transaction`] (it derefs to `Connection`) composes them into
//! one all-or-nothing unit. Every balance, sold-flag and status write is a
//! conditional `UPDATE ... WHERE` whose affected-row count tells the caller
//! whether the precondition held at write time.

pub mod accounts;
pub mod database;
pub mod listings;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod offers;
pub mod orders;
pub mod threads;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use rusqlite::{Connection, Transaction};
