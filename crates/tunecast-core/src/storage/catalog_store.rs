use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::database::{ConnectionPool, open_database, open_in_memory};
use crate::error::Result;
use crate::models::{
    ActivityEntry, ActivityKind, CanonicalRecord, NewActivity, OwnerScope, PageRequest,
    SavedPodcast,
};

/// Keeps bulk `IN (...)` lookups under SQLite's bound-parameter limit.
const IN_CHUNK: usize = 500;

/// Persistence contract the ingestion engine relies on.
///
/// Every bulk write is atomic per call. Implementations must make
/// `insert_*` and `upsert_*` safe against concurrent callers for the same owner.
pub trait CatalogStore: Send + Sync {
    /// Everything already recommended to `owner`; used to build the dedup index.
    fn recommendations_for_owner(&self, owner: &OwnerScope) -> Result<Vec<CanonicalRecord>>;

    fn list_recommendations(
        &self,
        owner: &OwnerScope,
        page: PageRequest,
    ) -> Result<Vec<CanonicalRecord>>;

    /// Insert the given records, skipping any that collide with an existing row.
    /// Returns the number of rows written.
    fn insert_recommendations(
        &self,
        owner: &OwnerScope,
        records: &[CanonicalRecord],
    ) -> Result<usize>;

    fn existing_episode_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    fn episodes_by_ids(&self, ids: &[String]) -> Result<Vec<CanonicalRecord>>;

    /// Insert episodes whose id is not stored yet. Returns the rows actually written.
    fn insert_episodes_if_absent(&self, records: &[CanonicalRecord])
    -> Result<Vec<CanonicalRecord>>;

    /// Insert-or-replace keyed by `(owner, id)`.
    fn upsert_podcast(&self, podcast: &SavedPodcast) -> Result<SavedPodcast>;

    fn saved_podcast(&self, owner: &OwnerScope, id: &str) -> Result<Option<SavedPodcast>>;

    fn saved_podcasts(&self, owner: &OwnerScope) -> Result<Vec<SavedPodcast>>;

    fn podcasts_by_ids(&self, owner: &OwnerScope, ids: &[String]) -> Result<Vec<SavedPodcast>>;

    /// Insert the activity, or refresh its timestamp if the same subject was
    /// already recorded. The timestamp is assigned here.
    fn touch_activity(&self, activity: &NewActivity) -> Result<ActivityEntry>;

    /// Newest first.
    fn activity_for_owner(
        &self,
        owner: &OwnerScope,
        kind: ActivityKind,
    ) -> Result<Vec<ActivityEntry>>;
}

pub struct SqliteCatalogStore {
    pool: ConnectionPool,
}

impl SqliteCatalogStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            pool: open_database(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            pool: open_in_memory()?,
        })
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Reads the ten canonical columns starting at `offset`, in declaration order:
/// id, title, secondary_title, media_url, image_url, duration_seconds,
/// published_at, label, copyright_text, year.
fn record_from_row(row: &Row, offset: usize) -> rusqlite::Result<CanonicalRecord> {
    Ok(CanonicalRecord {
        id: row.get(offset)?,
        title: row.get(offset + 1)?,
        secondary_title: row.get(offset + 2)?,
        media_url: row.get(offset + 3)?,
        image_url: row.get(offset + 4)?,
        duration_seconds: row.get(offset + 5)?,
        published_at: parse_timestamp(row.get(offset + 6)?),
        label: row.get(offset + 7)?,
        copyright_text: row.get(offset + 8)?,
        year: row.get(offset + 9)?,
    })
}

fn podcast_from_row(row: &Row) -> rusqlite::Result<SavedPodcast> {
    let owner: String = row.get(0)?;
    let episode_ids: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(SavedPodcast {
        // Rows are only ever written through a validated OwnerScope.
        owner: OwnerScope::new(owner).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        id: row.get(1)?,
        title: row.get(2)?,
        publisher: row.get(3)?,
        image_url: row.get(4)?,
        episode_ids: serde_json::from_str(&episode_ids).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?,
        updated_at: parse_timestamp(Some(updated_at)).unwrap_or_default(),
    })
}

fn activity_from_row(row: &Row) -> rusqlite::Result<ActivityEntry> {
    let owner: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let container_id: String = row.get(3)?;
    let recorded_at: String = row.get(6)?;
    let invalid = |idx: usize, e: crate::error::CoreError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    };
    Ok(ActivityEntry {
        id: row.get(0)?,
        owner: OwnerScope::new(owner).map_err(|e| invalid(1, e))?,
        kind: kind.parse().map_err(|e| invalid(2, e))?,
        container_id: Some(container_id).filter(|c| !c.is_empty()),
        item_id: row.get(4)?,
        progress: row.get(5)?,
        recorded_at: parse_timestamp(Some(recorded_at)).unwrap_or_default(),
    })
}

fn query_in<T>(
    conn: &Connection,
    sql_prefix: &str,
    leading: &[&str],
    ids: &[String],
    map: impl Fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!("{sql_prefix} ({})", placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let args = leading
            .iter()
            .map(|s| s.to_string())
            .chain(chunk.iter().cloned());
        let rows = stmt.query_map(params_from_iter(args), &map)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

impl CatalogStore for SqliteCatalogStore {
    fn recommendations_for_owner(&self, owner: &OwnerScope) -> Result<Vec<CanonicalRecord>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(
            "SELECT upstream_id, title, secondary_title, media_url, image_url, duration_seconds,
                    published_at, label, copyright_text, year
             FROM recommendations WHERE owner = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![owner.as_str()], |row| record_from_row(row, 0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn list_recommendations(
        &self,
        owner: &OwnerScope,
        page: PageRequest,
    ) -> Result<Vec<CanonicalRecord>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(
            "SELECT upstream_id, title, secondary_title, media_url, image_url, duration_seconds,
                    published_at, label, copyright_text, year
             FROM recommendations WHERE owner = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![owner.as_str(), page.limit, page.offset() as i64],
            |row| record_from_row(row, 0),
        )?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn insert_recommendations(
        &self,
        owner: &OwnerScope,
        records: &[CanonicalRecord],
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.pool.get_connection();
        let tx = conn.transaction()?;
        let now = timestamp(Utc::now());
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO recommendations
                    (owner, upstream_id, title, title_key, secondary_title, media_url, image_url,
                     duration_seconds, published_at, label, copyright_text, year, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for record in records {
                written += stmt.execute(params![
                    owner.as_str(),
                    record.id,
                    record.title,
                    record.title_key(),
                    record.secondary_title,
                    record.media_url,
                    record.image_url,
                    record.duration_seconds,
                    record.published_at.map(timestamp),
                    record.label,
                    record.copyright_text,
                    record.year,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn existing_episode_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let conn = self.pool.get_connection();
        let found = query_in(&conn, "SELECT id FROM episodes WHERE id IN", &[], ids, |row| {
            row.get::<_, String>(0)
        })?;
        Ok(found.into_iter().collect())
    }

    fn episodes_by_ids(&self, ids: &[String]) -> Result<Vec<CanonicalRecord>> {
        let conn = self.pool.get_connection();
        query_in(
            &conn,
            "SELECT id, title, secondary_title, media_url, image_url, duration_seconds,
                    published_at, label, copyright_text, year
             FROM episodes WHERE id IN",
            &[],
            ids,
            |row| record_from_row(row, 0),
        )
    }

    fn insert_episodes_if_absent(
        &self,
        records: &[CanonicalRecord],
    ) -> Result<Vec<CanonicalRecord>> {
        let mut conn = self.pool.get_connection();
        let tx = conn.transaction()?;
        let now = timestamp(Utc::now());
        let mut inserted = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO episodes
                    (id, title, secondary_title, media_url, image_url, duration_seconds,
                     published_at, label, copyright_text, year, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for record in records {
                let Some(id) = record.id.as_deref() else {
                    continue;
                };
                let changed = stmt.execute(params![
                    id,
                    record.title,
                    record.secondary_title,
                    record.media_url,
                    record.image_url,
                    record.duration_seconds,
                    record.published_at.map(timestamp),
                    record.label,
                    record.copyright_text,
                    record.year,
                    now,
                ])?;
                if changed > 0 {
                    inserted.push(record.clone());
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn upsert_podcast(&self, podcast: &SavedPodcast) -> Result<SavedPodcast> {
        let episode_ids = serde_json::to_string(&podcast.episode_ids)?;
        let conn = self.pool.get_connection();
        conn.execute(
            "INSERT INTO podcasts (owner, id, title, publisher, image_url, episode_ids, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(owner, id) DO UPDATE SET
                title = excluded.title,
                publisher = excluded.publisher,
                image_url = excluded.image_url,
                episode_ids = excluded.episode_ids,
                updated_at = excluded.updated_at",
            params![
                podcast.owner.as_str(),
                podcast.id,
                podcast.title,
                podcast.publisher,
                podcast.image_url,
                episode_ids,
                timestamp(podcast.updated_at),
            ],
        )?;
        let stored = conn.query_row(
            "SELECT owner, id, title, publisher, image_url, episode_ids, updated_at
             FROM podcasts WHERE owner = ?1 AND id = ?2",
            params![podcast.owner.as_str(), podcast.id],
            podcast_from_row,
        )?;
        Ok(stored)
    }

    fn saved_podcast(&self, owner: &OwnerScope, id: &str) -> Result<Option<SavedPodcast>> {
        let conn = self.pool.get_connection();
        let podcast = conn
            .query_row(
                "SELECT owner, id, title, publisher, image_url, episode_ids, updated_at
                 FROM podcasts WHERE owner = ?1 AND id = ?2",
                params![owner.as_str(), id],
                podcast_from_row,
            )
            .optional()?;
        Ok(podcast)
    }

    fn saved_podcasts(&self, owner: &OwnerScope) -> Result<Vec<SavedPodcast>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(
            "SELECT owner, id, title, publisher, image_url, episode_ids, updated_at
             FROM podcasts WHERE owner = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![owner.as_str()], podcast_from_row)?;
        let mut podcasts = Vec::new();
        for row in rows {
            podcasts.push(row?);
        }
        Ok(podcasts)
    }

    fn podcasts_by_ids(&self, owner: &OwnerScope, ids: &[String]) -> Result<Vec<SavedPodcast>> {
        let conn = self.pool.get_connection();
        query_in(
            &conn,
            "SELECT owner, id, title, publisher, image_url, episode_ids, updated_at
             FROM podcasts WHERE owner = ? AND id IN",
            &[owner.as_str()],
            ids,
            podcast_from_row,
        )
    }

    fn touch_activity(&self, activity: &NewActivity) -> Result<ActivityEntry> {
        let conn = self.pool.get_connection();
        let entry = conn.query_row(
            "INSERT INTO activity (owner, kind, container_id, item_id, progress, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(owner, kind, container_id, item_id) DO UPDATE SET
                recorded_at = excluded.recorded_at,
                progress = COALESCE(excluded.progress, activity.progress)
             RETURNING id, owner, kind, container_id, item_id, progress, recorded_at",
            params![
                activity.owner.as_str(),
                activity.kind.to_string(),
                activity.container_id.as_deref().unwrap_or_default(),
                activity.item_id,
                activity.progress,
                timestamp(Utc::now()),
            ],
            activity_from_row,
        )?;
        Ok(entry)
    }

    fn activity_for_owner(
        &self,
        owner: &OwnerScope,
        kind: ActivityKind,
    ) -> Result<Vec<ActivityEntry>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(
            "SELECT id, owner, kind, container_id, item_id, progress, recorded_at
             FROM activity WHERE owner = ?1 AND kind = ?2
             ORDER BY recorded_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![owner.as_str(), kind.to_string()], activity_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
