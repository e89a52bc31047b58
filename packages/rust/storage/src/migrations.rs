//! SQL migration definitions for the archive database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: collections, records, assets",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per archived work
CREATE TABLE IF NOT EXISTS collections (
    name       TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Structured records (work metadata), upserted by id
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    id         TEXT NOT NULL,
    body_json  TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);

-- Page images, upserted by "<chapter>-<index>"
CREATE TABLE IF NOT EXISTS assets (
    collection    TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    doc_id        TEXT NOT NULL,
    chapter       INTEGER NOT NULL,
    image_index   INTEGER NOT NULL,
    content_type  TEXT NOT NULL,
    sha256        TEXT NOT NULL,
    data          BLOB NOT NULL,
    metadata_json TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (collection, doc_id)
);

CREATE INDEX IF NOT EXISTS idx_assets_chapter ON assets(collection, chapter);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
