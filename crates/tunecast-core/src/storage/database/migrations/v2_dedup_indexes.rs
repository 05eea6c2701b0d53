use rusqlite::Connection;

use super::Migration;
use crate::error::Result;
use crate::storage::database::schema;

pub struct V2DedupIndexes;

impl Migration for V2DedupIndexes {
    fn version(&self) -> u32 {
        2
    }

    fn description(&self) -> &'static str {
        "Unique indexes for owner-scoped recommendation and activity dedup"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        schema::create_dedup_indexes(conn)
    }
}
