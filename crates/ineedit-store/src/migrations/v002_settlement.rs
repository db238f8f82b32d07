//! v002 -- Offers, orders with escrow/refund state, the order status audit
//! trail and the platform revenue row.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS offers (
    id               TEXT PRIMARY KEY NOT NULL,
    listing_id       TEXT NOT NULL,
    buyer_id         TEXT NOT NULL,
    seller_id        TEXT NOT NULL,
    mode             TEXT NOT NULL,            -- buyer | seller_private | seller_broadcast
    amount_cents     INTEGER NOT NULL CHECK (amount_cents > 0),
    shipping_cents   INTEGER NOT NULL DEFAULT 0 CHECK (shipping_cents >= 0),
    tax_cents        INTEGER NOT NULL DEFAULT 0 CHECK (tax_cents >= 0),
    total_cents      INTEGER NOT NULL,
    shipping_address TEXT,                     -- JSON
    status           TEXT NOT NULL DEFAULT 'pending',
    funds_held       INTEGER NOT NULL DEFAULT 0,
    expires_at       TEXT,                     -- NULL: never auto-expires
    responded_at     TEXT,
    created_at       TEXT NOT NULL,

    CHECK (total_cents = amount_cents + shipping_cents + tax_cents),
    CHECK (funds_held = 0 OR status = 'pending'),
    FOREIGN KEY (listing_id) REFERENCES listings(id),
    FOREIGN KEY (buyer_id)   REFERENCES accounts(id),
    FOREIGN KEY (seller_id)  REFERENCES accounts(id)
);

CREATE INDEX IF NOT EXISTS idx_offers_listing_status ON offers(listing_id, status);
CREATE INDEX IF NOT EXISTS idx_offers_status_expiry  ON offers(status, expires_at);

CREATE TABLE IF NOT EXISTS orders (
    id                        TEXT PRIMARY KEY NOT NULL,
    order_code                TEXT NOT NULL UNIQUE,
    listing_id                TEXT NOT NULL UNIQUE,   -- a listing sells once
    buyer_id                  TEXT NOT NULL,
    seller_id                 TEXT NOT NULL,
    offer_id                  TEXT,
    thread_id                 TEXT,
    status                    TEXT NOT NULL,
    item_price_cents          INTEGER NOT NULL,
    shipping_cents            INTEGER NOT NULL,
    tax_cents                 INTEGER NOT NULL,
    total_cents               INTEGER NOT NULL,
    shipping_address          TEXT,                   -- JSON
    tracking_number           TEXT,
    carrier                   TEXT,
    shipped_at                TEXT,
    delivered_at              TEXT,
    escrow_held_cents         INTEGER NOT NULL,
    escrow_status             TEXT NOT NULL DEFAULT 'HELD',
    escrow_released_at        TEXT,
    seller_payout_cents       INTEGER,
    platform_fee_cents        INTEGER,
    refund_mode               TEXT,
    refund_amount_cents       INTEGER,
    refund_fee_cents          INTEGER,
    refund_seller_debit_cents INTEGER,
    refund_reason             TEXT,
    refund_issued_at          TEXT,
    snapshot_title            TEXT NOT NULL,
    snapshot_price_cents      INTEGER NOT NULL,
    snapshot_image_url        TEXT,
    created_at                TEXT NOT NULL,

    FOREIGN KEY (listing_id) REFERENCES listings(id),
    FOREIGN KEY (buyer_id)   REFERENCES accounts(id),
    FOREIGN KEY (seller_id)  REFERENCES accounts(id)
);

CREATE INDEX IF NOT EXISTS idx_orders_buyer  ON orders(buyer_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_orders_seller ON orders(seller_id, created_at DESC);

CREATE TABLE IF NOT EXISTS order_status_history (
    order_id TEXT NOT NULL,
    seq      INTEGER NOT NULL,
    status   TEXT NOT NULL,
    at       TEXT NOT NULL,

    PRIMARY KEY (order_id, seq),
    FOREIGN KEY (order_id) REFERENCES orders(id)
);

CREATE TABLE IF NOT EXISTS platform_revenue (
    id                  INTEGER PRIMARY KEY CHECK (id = 1),
    total_revenue_cents INTEGER NOT NULL DEFAULT 0,
    total_transactions  INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO platform_revenue (id, total_revenue_cents, total_transactions)
VALUES (1, 0, 0);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
