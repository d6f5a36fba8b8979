//! SQL schema for the Quill SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS comments (
    comment_id                TEXT PRIMARY KEY,
    chain_id                  INTEGER NOT NULL,
    author                    TEXT NOT NULL,   -- lowercase hex
    app                       TEXT NOT NULL,   -- lowercase hex app signer
    parent_id                 TEXT,            -- no FK: parents may be ingested late
    comment_type              TEXT NOT NULL DEFAULT 'comment',
    content                   TEXT NOT NULL,
    revision                  INTEGER NOT NULL DEFAULT 0,
    references_json           TEXT NOT NULL DEFAULT '[]',
    references_status         TEXT,
    moderation_status         TEXT NOT NULL DEFAULT 'pending',
    moderation_classification TEXT,            -- JSON ClassificationResult
    created_at                TEXT NOT NULL,
    updated_at                TEXT NOT NULL,
    deleted_at                TEXT
);

CREATE INDEX IF NOT EXISTS comments_parent_idx ON comments(parent_id);

-- Written in the same transaction as the comment mutation it describes.
CREATE TABLE IF NOT EXISTS outbox_events (
    event_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    aggregate_type TEXT NOT NULL,
    aggregate_id   TEXT NOT NULL,
    event_type     TEXT NOT NULL,
    payload        TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    dispatched_at  TEXT,
    attempts       INTEGER NOT NULL DEFAULT 0,
    last_error     TEXT,
    failed_at      TEXT
);

CREATE INDEX IF NOT EXISTS outbox_pending_idx
    ON outbox_events(event_id)
    WHERE dispatched_at IS NULL AND failed_at IS NULL;

-- Timestamps are integer microseconds so keyset cursors compare exactly.
CREATE TABLE IF NOT EXISTS notifications (
    notification_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    uid               TEXT NOT NULL UNIQUE,
    notification_type TEXT NOT NULL,
    chain_id          INTEGER NOT NULL,
    recipient_address TEXT NOT NULL,
    author_address    TEXT NOT NULL,
    app_signer        TEXT NOT NULL,
    parent_id         TEXT NOT NULL,
    entity_id         TEXT NOT NULL,
    created_at_us     INTEGER NOT NULL,
    updated_at_us     INTEGER NOT NULL,
    seen_at           TEXT
);

CREATE INDEX IF NOT EXISTS notifications_recipient_idx
    ON notifications(recipient_address, notification_id);
CREATE INDEX IF NOT EXISTS notifications_group_idx
    ON notifications(recipient_address, app_signer, notification_type, parent_id,
                     updated_at_us, notification_id);
CREATE INDEX IF NOT EXISTS notifications_entity_idx ON notifications(entity_id);

CREATE TABLE IF NOT EXISTS comment_reference_results (
    comment_id       TEXT PRIMARY KEY REFERENCES comments(comment_id),
    comment_revision INTEGER NOT NULL,
    references_json  TEXT NOT NULL,
    status           TEXT NOT NULL,   -- 'success' | 'partial' | 'failed'
    updated_at       TEXT NOT NULL,
    failing_since    TEXT             -- first unsuccessful resolution of this revision
);

CREATE INDEX IF NOT EXISTS reference_results_failing_idx
    ON comment_reference_results(failing_since)
    WHERE failing_since IS NOT NULL;

PRAGMA user_version = 1;
";
