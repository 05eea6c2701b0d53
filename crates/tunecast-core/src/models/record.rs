use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The normalized unit every upstream item is mapped onto, regardless of which
/// provider produced it or which field names it used.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalRecord {
    /// Upstream-assigned id. Absent for aggregated or derived records.
    pub id: Option<String>,
    pub title: Option<String>,
    /// Artist for tracks, publisher for podcasts.
    pub secondary_title: Option<String>,
    pub media_url: Option<String>,
    pub image_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub label: Option<String>,
    pub copyright_text: Option<String>,
    pub year: Option<i32>,
}

impl CanonicalRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// A record may be persisted only if it can be recognised again later,
    /// i.e. it has a media URL or a title.
    pub fn is_eligible(&self) -> bool {
        self.media_url.is_some() || self.title.is_some()
    }

    /// Secondary dedup key: trimmed, case-folded title.
    pub fn title_key(&self) -> Option<String> {
        self.title.as_deref().and_then(title_key)
    }

    pub fn published_date(&self) -> Option<String> {
        self.published_at
            .map(|ts| ts.date_naive().format("%Y-%m-%d").to_string())
    }
}

pub fn title_key(title: &str) -> Option<String> {
    let key = title.trim().to_lowercase();
    if key.is_empty() { None } else { Some(key) }
}

/// Oldest first; records without a publication time are treated as the most
/// recent and sort last. Stable, so equal timestamps keep upstream order.
pub fn sort_oldest_first(records: &mut [CanonicalRecord]) {
    records.sort_by_key(|r| (r.published_at.is_none(), r.published_at));
}
