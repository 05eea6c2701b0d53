use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::owner::OwnerScope;
use super::record::CanonicalRecord;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// A podcast episode listened to.
    Episode,
    /// A catalog track played.
    Track,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Episode => f.write_str("episode"),
            Self::Track => f.write_str("track"),
        }
    }
}

impl FromStr for ActivityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "episode" | "podcast" => Ok(Self::Episode),
            "track" | "song" | "music" => Ok(Self::Track),
            other => Err(CoreError::Validation(format!("unknown activity kind: {other}"))),
        }
    }
}

/// Input for recording activity. The timestamp is never taken from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub owner: OwnerScope,
    pub kind: ActivityKind,
    pub container_id: Option<String>,
    pub item_id: String,
    pub progress: Option<i64>,
}

impl NewActivity {
    pub fn new(
        owner: OwnerScope,
        kind: ActivityKind,
        container_id: Option<String>,
        item_id: impl Into<String>,
        progress: Option<i64>,
    ) -> Result<Self> {
        let item_id = item_id.into().trim().to_string();
        let container_id = container_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        if item_id.is_empty() {
            return Err(CoreError::Validation(format!("{kind} id is required")));
        }
        if kind == ActivityKind::Episode && container_id.is_none() {
            return Err(CoreError::Validation(
                "podcast_id and episode_id are required".to_string(),
            ));
        }

        Ok(Self {
            owner,
            kind,
            container_id,
            item_id,
            progress,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub owner: OwnerScope,
    pub kind: ActivityKind,
    pub container_id: Option<String>,
    pub item_id: String,
    pub progress: Option<i64>,
    /// Server-assigned at write time.
    pub recorded_at: DateTime<Utc>,
}

/// An activity entry with the podcast and episode it refers to, when still stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryView {
    pub entry: ActivityEntry,
    pub container: Option<CanonicalRecord>,
    pub item: Option<CanonicalRecord>,
}
