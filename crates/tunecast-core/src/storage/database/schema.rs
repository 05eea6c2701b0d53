use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 2;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS recommendations (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            owner            TEXT NOT NULL,
            upstream_id      TEXT,
            title            TEXT,
            title_key        TEXT,
            secondary_title  TEXT,
            media_url        TEXT,
            image_url        TEXT,
            duration_seconds INTEGER,
            published_at     TEXT,
            label            TEXT,
            copyright_text   TEXT,
            year             INTEGER,
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS episodes (
            id               TEXT PRIMARY KEY,
            title            TEXT,
            secondary_title  TEXT,
            media_url        TEXT,
            image_url        TEXT,
            duration_seconds INTEGER,
            published_at     TEXT,
            label            TEXT,
            copyright_text   TEXT,
            year             INTEGER,
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS podcasts (
            owner       TEXT NOT NULL,
            id          TEXT NOT NULL,
            title       TEXT NOT NULL,
            publisher   TEXT,
            image_url   TEXT,
            episode_ids TEXT NOT NULL DEFAULT '[]',
            updated_at  TEXT NOT NULL,
            PRIMARY KEY (owner, id)
        );

        CREATE TABLE IF NOT EXISTS activity (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            owner        TEXT NOT NULL,
            kind         TEXT NOT NULL CHECK(kind IN ('episode', 'track')),
            container_id TEXT NOT NULL DEFAULT '',
            item_id      TEXT NOT NULL,
            progress     INTEGER,
            recorded_at  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_recommendations_owner ON recommendations(owner);
        CREATE INDEX IF NOT EXISTS idx_activity_owner_time   ON activity(owner, recorded_at);
        ",
    )?;
    Ok(())
}

/// Unique keys backing insert-or-ignore against concurrent writers.
pub fn create_dedup_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS uq_recommendations_media
            ON recommendations(owner, media_url) WHERE media_url IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS uq_recommendations_title
            ON recommendations(owner, title_key) WHERE media_url IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS uq_activity_subject
            ON activity(owner, kind, container_id, item_id);
        ",
    )?;
    Ok(())
}
