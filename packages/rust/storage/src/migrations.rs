//! SQL migration definitions for the diplomagen blob database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: files keyed by task and kind",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Uploaded sources, intermediate tables and generated artifacts
CREATE TABLE IF NOT EXISTS files (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,
    file_name  TEXT NOT NULL,
    data       BLOB NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(task_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_files_task_id ON files(task_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index files by creation time for the retention sweep",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
