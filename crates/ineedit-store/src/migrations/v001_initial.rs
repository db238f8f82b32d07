//! v001 -- Initial schema creation.
//!
//! Accounts, listings (with shipping options and favorites) and the
//! conversation log: threads, messages and per-participant read receipts.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Accounts (wallet holders)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS accounts (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    display_name  TEXT NOT NULL,
    balance_cents INTEGER NOT NULL DEFAULT 0 CHECK (balance_cents >= 0),
    created_at    TEXT NOT NULL                -- RFC-3339, UTC, millis
);

-- ----------------------------------------------------------------
-- Listings
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS listings (
    id                   TEXT PRIMARY KEY NOT NULL,
    seller_id            TEXT NOT NULL,
    title                TEXT NOT NULL,
    description          TEXT NOT NULL DEFAULT '',
    price_cents          INTEGER NOT NULL CHECK (price_cents > 0),
    original_price_cents INTEGER,
    thumbnail            TEXT,
    buyer_id             TEXT,                 -- set once, on sale
    is_sold              INTEGER NOT NULL DEFAULT 0,
    is_deleted           INTEGER NOT NULL DEFAULT 0,
    is_draft             INTEGER NOT NULL DEFAULT 0,
    is_free_shipping     INTEGER NOT NULL DEFAULT 0,
    can_offer            INTEGER NOT NULL DEFAULT 1,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL,

    FOREIGN KEY (seller_id) REFERENCES accounts(id),
    FOREIGN KEY (buyer_id)  REFERENCES accounts(id)
);

CREATE INDEX IF NOT EXISTS idx_listings_seller ON listings(seller_id);

CREATE TABLE IF NOT EXISTS listing_shipping (
    listing_id TEXT NOT NULL,
    region     TEXT NOT NULL,
    cost_cents INTEGER NOT NULL DEFAULT 0 CHECK (cost_cents >= 0),
    enabled    INTEGER NOT NULL DEFAULT 1,

    PRIMARY KEY (listing_id, region),
    FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS favorites (
    account_id TEXT NOT NULL,
    listing_id TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (account_id, listing_id),
    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
    FOREIGN KEY (listing_id) REFERENCES listings(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_favorites_listing ON favorites(listing_id);

-- ----------------------------------------------------------------
-- Threads: one per (listing, buyer, seller)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS threads (
    id              TEXT PRIMARY KEY NOT NULL,
    listing_id      TEXT NOT NULL,
    buyer_id        TEXT NOT NULL,
    seller_id       TEXT NOT NULL,
    last_message_id TEXT,
    last_message_at TEXT NOT NULL,
    archived_reason TEXT,                      -- sold_to_other | listing_deleted
    created_at      TEXT NOT NULL,

    UNIQUE (listing_id, buyer_id, seller_id),
    FOREIGN KEY (listing_id) REFERENCES listings(id)
);

CREATE INDEX IF NOT EXISTS idx_threads_buyer  ON threads(buyer_id, last_message_at DESC);
CREATE INDEX IF NOT EXISTS idx_threads_seller ON threads(seller_id, last_message_at DESC);

-- ----------------------------------------------------------------
-- Messages (append-only; offer_snapshot status is the one mutable column)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id             TEXT PRIMARY KEY NOT NULL,
    thread_id      TEXT NOT NULL,
    listing_id     TEXT NOT NULL,
    sender_id      TEXT,                       -- NULL for system messages
    kind           TEXT NOT NULL,              -- text | offer | system
    content        TEXT,
    offer_id       TEXT,
    offer_snapshot TEXT,                       -- JSON
    system_event   TEXT,
    system_data    TEXT,                       -- JSON
    order_id       TEXT,
    created_at     TEXT NOT NULL,

    FOREIGN KEY (thread_id) REFERENCES threads(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_thread_ts ON messages(thread_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_offer ON messages(offer_id);

-- An order-scoped system event can be recorded at most once.
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_order_event
    ON messages(order_id, system_event)
    WHERE order_id IS NOT NULL AND system_event IS NOT NULL;

CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,
    account_id TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, account_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
