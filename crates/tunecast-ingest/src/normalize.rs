//! Maps loosely-shaped upstream JSON onto [`CanonicalRecord`].
//!
//! Every canonical field has an ordered alias list; the first alias holding a
//! usable value wins. `null`, blank strings and values of the wrong shape are
//! skipped, so a later alias can still supply the field. Each list starts with
//! the canonical field name, which makes normalizing an already-canonical
//! record a no-op.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use tunecast_core::{CanonicalRecord, PodcastSubmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Title,
    SecondaryTitle,
    MediaUrl,
    ImageUrl,
    DurationSeconds,
    PublishedAt,
    Label,
    CopyrightText,
    Year,
}

pub struct FieldAliases {
    pub field: Field,
    pub aliases: &'static [&'static str],
}

pub const FIELD_ALIASES: &[FieldAliases] = &[
    FieldAliases {
        field: Field::Id,
        aliases: &["id", "_id", "podcast_id", "episode_id", "song_id"],
    },
    FieldAliases {
        field: Field::Title,
        aliases: &["title", "song", "title_original", "name", "music_name"],
    },
    FieldAliases {
        field: Field::SecondaryTitle,
        aliases: &[
            "secondary_title",
            "publisher",
            "publisher_original",
            "primary_artists",
            "artist",
            "singers",
            "music",
        ],
    },
    FieldAliases {
        field: Field::MediaUrl,
        aliases: &[
            "media_url",
            "mediaUrl",
            "audio",
            "mediaURL",
            "downloadUrl",
            "url",
            "more_info",
            "link",
        ],
    },
    FieldAliases {
        field: Field::ImageUrl,
        aliases: &["image_url", "imageUrl", "image", "thumbnail", "img", "cover"],
    },
    FieldAliases {
        field: Field::DurationSeconds,
        aliases: &[
            "duration_seconds",
            "durationSeconds",
            "audio_length_sec",
            "duration",
            "length",
            "time",
        ],
    },
    FieldAliases {
        field: Field::PublishedAt,
        aliases: &["published_at", "publishedAt", "pub_date_ms", "release_date", "date"],
    },
    FieldAliases {
        field: Field::Label,
        aliases: &["label", "album", "album_name"],
    },
    FieldAliases {
        field: Field::CopyrightText,
        aliases: &["copyright_text", "copyrightText", "copyright"],
    },
    FieldAliases {
        field: Field::Year,
        aliases: &["year", "release_year", "released"],
    },
];

/// Where the item list lives inside a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLayout {
    /// Keys tried in order for a named item array.
    pub containers: &'static [&'static str],
    /// Per-item wrapper key, e.g. search hits shaped `{"podcast": {...}}`.
    pub envelope: Option<&'static str>,
    /// Treat a body with no recognised array as a single item.
    pub wrap_object: bool,
}

impl ItemLayout {
    pub const TRACKS: Self = Self {
        containers: &["results", "data", "songs", "tracks"],
        envelope: None,
        wrap_object: true,
    };

    pub const PODCAST_SEARCH: Self = Self {
        containers: &["results", "data", "podcasts"],
        envelope: Some("podcast"),
        wrap_object: false,
    };

    pub const BEST_PODCASTS: Self = Self {
        containers: &["podcasts", "best_podcasts", "results", "data"],
        envelope: None,
        wrap_object: false,
    };

    pub const EPISODES: Self = Self {
        containers: &["episodes"],
        envelope: None,
        wrap_object: false,
    };
}

/// Never fails; unusable input yields an empty record.
pub fn normalize(raw: &Value) -> CanonicalRecord {
    let mut record = CanonicalRecord::default();
    let Some(item) = raw.as_object() else {
        return record;
    };

    for entry in FIELD_ALIASES {
        let aliases = entry.aliases;
        match entry.field {
            Field::Id => record.id = resolve(item, aliases, coerce_text),
            Field::Title => record.title = resolve(item, aliases, coerce_text),
            Field::SecondaryTitle => record.secondary_title = resolve(item, aliases, coerce_text),
            Field::MediaUrl => record.media_url = resolve(item, aliases, coerce_text),
            Field::ImageUrl => record.image_url = resolve(item, aliases, coerce_text),
            Field::DurationSeconds => {
                record.duration_seconds = resolve(item, aliases, coerce_seconds)
            }
            Field::PublishedAt => record.published_at = resolve(item, aliases, coerce_timestamp),
            Field::Label => record.label = resolve(item, aliases, coerce_text),
            Field::CopyrightText => record.copyright_text = resolve(item, aliases, coerce_text),
            Field::Year => record.year = resolve(item, aliases, coerce_year),
        }
    }
    record
}

pub fn normalize_items(payload: &Value, layout: ItemLayout) -> Vec<CanonicalRecord> {
    extract_items(payload, layout)
        .into_iter()
        .map(normalize)
        .collect()
}

/// Read a podcast save request. Accepts the canonical submission shape as
/// well as a raw upstream podcast payload with its `episodes` list.
pub fn normalize_submission(payload: &Value) -> PodcastSubmission {
    let podcast = normalize(payload);
    PodcastSubmission {
        id: podcast.id,
        title: podcast.title,
        publisher: podcast.secondary_title,
        image_url: podcast.image_url,
        episodes: normalize_items(payload, ItemLayout::EPISODES),
    }
}

/// Locate the item list in `payload`: a bare array, a named array, or (if the
/// layout allows) the object itself. A `data` object is descended into once,
/// only when the outer object has no named array.
pub fn extract_items(payload: &Value, layout: ItemLayout) -> Vec<&Value> {
    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => match named_array(payload, layout) {
            Some(items) => items.iter().collect(),
            None => match payload.get("data") {
                Some(inner) if inner.is_object() => match named_array(inner, layout) {
                    Some(items) => items.iter().collect(),
                    None if layout.wrap_object => vec![inner],
                    None => Vec::new(),
                },
                _ if layout.wrap_object => vec![payload],
                _ => Vec::new(),
            },
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| unwrap_envelope(item, layout.envelope))
        .collect()
}

fn named_array(payload: &Value, layout: ItemLayout) -> Option<&Vec<Value>> {
    layout
        .containers
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
}

fn unwrap_envelope<'a>(item: &'a Value, envelope: Option<&str>) -> &'a Value {
    envelope
        .and_then(|key| item.get(key))
        .filter(|inner| inner.is_object())
        .unwrap_or(item)
}

fn resolve<T>(
    item: &Map<String, Value>,
    aliases: &[&str],
    coerce: fn(&Value) -> Option<T>,
) -> Option<T> {
    aliases
        .iter()
        .filter_map(|alias| item.get(*alias))
        .find_map(coerce)
}

// ─── Coercions ────────────────────────────────────────────────────────────────

fn non_blank(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn coerce_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => non_blank(s).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_seconds(v: &Value) -> Option<i64> {
    let secs = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(round_f64)),
        Value::String(s) => parse_seconds(non_blank(s)?),
        _ => None,
    }?;
    (secs >= 0).then_some(secs)
}

fn round_f64(f: f64) -> Option<i64> {
    (f.is_finite() && f.abs() < i64::MAX as f64).then(|| f.round() as i64)
}

/// Plain seconds, or `mm:ss` / `hh:mm:ss`.
fn parse_seconds(s: &str) -> Option<i64> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        return round_f64(f);
    }

    let parts = s
        .split(':')
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (h, m, sec) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    if sec >= 60 || (parts.len() == 3 && m >= 60) {
        return None;
    }
    Some(i64::from(h) * 3600 + i64::from(m) * 60 + i64::from(sec))
}

fn coerce_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(round_f64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => parse_timestamp(non_blank(s)?),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ms) = s.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn coerce_year(v: &Value) -> Option<i32> {
    match v {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => {
            let s = s.trim();
            let head = s.get(..4)?;
            if head.bytes().all(|b| b.is_ascii_digit()) {
                head.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}
