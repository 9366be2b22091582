//! Database schema definitions.

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the database schema.
pub const CREATE_SCHEMA: &str = r#"
-- Every identity we have ever seen, ourselves included
CREATE TABLE IF NOT EXISTS onions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    onion TEXT NOT NULL UNIQUE
);

-- Local identity (only one)
CREATE TABLE IF NOT EXISTS identity (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    onion_id INTEGER NOT NULL REFERENCES onions(id),
    pem_key TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    onion_id INTEGER NOT NULL UNIQUE REFERENCES onions(id),
    alias TEXT NOT NULL UNIQUE,
    status INTEGER NOT NULL,
    request_message TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS circles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    creator TEXT NOT NULL DEFAULT 'USER'
);

CREATE TABLE IF NOT EXISTS circle_contacts (
    circle_id INTEGER NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
    contact_id INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
    PRIMARY KEY (circle_id, contact_id)
);

CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message TEXT NOT NULL,
    posted_at INTEGER NOT NULL,
    published_at INTEGER NOT NULL DEFAULT 0,
    remote_published_at INTEGER NOT NULL DEFAULT 0,
    ttl INTEGER NOT NULL,
    author_id INTEGER NOT NULL REFERENCES onions(id),
    originator_id INTEGER NOT NULL REFERENCES onions(id),
    hash TEXT NOT NULL UNIQUE,
    parent_id INTEGER NOT NULL DEFAULT 0,
    parent_hash TEXT NOT NULL DEFAULT '',
    published INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_posts_originator ON posts(originator_id);
CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts(published_at);

CREATE TABLE IF NOT EXISTS circle_posts (
    circle_id INTEGER NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
    post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    PRIMARY KEY (circle_id, post_id)
);

CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    onion_id INTEGER NOT NULL REFERENCES onions(id),
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    changed_at INTEGER NOT NULL,
    UNIQUE (onion_id, key)
);

CREATE TABLE IF NOT EXISTS circle_profiles (
    circle_id INTEGER NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
    profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    PRIMARY KEY (circle_id, profile_id)
);

-- Change flags polled by the UI
CREATE TABLE IF NOT EXISTS pending (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    posts INTEGER NOT NULL DEFAULT 0,
    contacts INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO pending (id) VALUES (1);
INSERT OR IGNORE INTO circles (name, creator) VALUES ('Public', 'APP');

-- Settings table
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

-- Schema version
INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', ?);
"#;
