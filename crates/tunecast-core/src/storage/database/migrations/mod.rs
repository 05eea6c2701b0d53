mod v1_initial;
mod v2_dedup_indexes;

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::{CoreError, Result};

pub trait Migration {
    fn version(&self) -> u32;
    fn description(&self) -> &'static str;
    fn up(&self, conn: &Connection) -> Result<()>;
}

fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(v1_initial::V1Initial),
        Box::new(v2_dedup_indexes::V2DedupIndexes),
    ]
}

/// Versions recorded in `schema_migrations`, creating the ledger table first
/// so a fresh database reads as "nothing applied".
pub fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<BTreeSet<u32>>>()?;
    Ok(versions)
}

/// Apply every pending migration in version order. Each migration and its
/// ledger row commit together.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied = applied_versions(conn)?;

    for migration in all_migrations() {
        let version = migration.version();
        if applied.contains(&version) {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        migration.up(&tx).map_err(|e| CoreError::Migration {
            version,
            message: format!("{}: {e}", migration.description()),
        })?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
    }

    Ok(())
}
