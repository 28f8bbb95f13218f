//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use tc_core::{Error, Result};

/// V1: initial schema -- one job and one rendition per (video, quality).
const V1_INITIAL: &str = r#"
-- Transcoding jobs (one per video/target quality)
CREATE TABLE transcoding_jobs (
    id             TEXT PRIMARY KEY,
    video_id       INTEGER NOT NULL,
    target_quality TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    progress       INTEGER NOT NULL DEFAULT 0,
    error_message  TEXT,
    source_path    TEXT NOT NULL,
    output_path    TEXT NOT NULL,
    attempts       INTEGER NOT NULL DEFAULT 1,
    started_at     TEXT,
    completed_at   TEXT,
    queued_at      TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE (video_id, target_quality)
);

CREATE INDEX idx_transcoding_jobs_video  ON transcoding_jobs(video_id);
CREATE INDEX idx_transcoding_jobs_status ON transcoding_jobs(status);

-- Renditions (ready-to-serve variants)
CREATE TABLE video_renditions (
    id              TEXT PRIMARY KEY,
    video_id        INTEGER NOT NULL,
    quality         TEXT NOT NULL,
    output_location TEXT NOT NULL,
    bitrate_kbps    INTEGER NOT NULL,
    width           INTEGER NOT NULL,
    height          INTEGER NOT NULL,
    file_size_bytes INTEGER,
    status          TEXT NOT NULL DEFAULT 'pending',
    created_at      TEXT NOT NULL,
    UNIQUE (video_id, quality)
);

CREATE INDEX idx_video_renditions_video ON video_renditions(video_id);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        tracing::debug!("Applied migration V{version}");
    }

    Ok(())
}
