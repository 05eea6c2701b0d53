use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::owner::OwnerScope;
use super::record::CanonicalRecord;
use crate::error::{CoreError, Result};

/// A podcast as shown in search/browse results: base metadata plus episodes.
/// An empty episode list is also the degraded form used when the episode fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastSummary {
    pub podcast: CanonicalRecord,
    pub episodes: Vec<CanonicalRecord>,
}

impl PodcastSummary {
    pub fn without_episodes(podcast: CanonicalRecord) -> Self {
        Self {
            podcast,
            episodes: Vec::new(),
        }
    }
}

/// Container row for a podcast a user saved, keyed by the podcast's natural id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPodcast {
    pub id: String,
    pub owner: OwnerScope,
    pub title: String,
    pub publisher: Option<String>,
    pub image_url: Option<String>,
    /// Newest first.
    pub episode_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl SavedPodcast {
    /// Record a newly discovered episode at the head of the list.
    /// Returns false when the id was already known.
    pub fn prepend_episode(&mut self, episode_id: &str) -> bool {
        if self.episode_ids.iter().any(|id| id == episode_id) {
            return false;
        }
        self.episode_ids.insert(0, episode_id.to_string());
        true
    }

    pub fn to_record(&self) -> CanonicalRecord {
        CanonicalRecord {
            id: Some(self.id.clone()),
            title: Some(self.title.clone()),
            secondary_title: self.publisher.clone(),
            image_url: self.image_url.clone(),
            ..Default::default()
        }
    }
}

/// What a caller submits when saving a podcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodcastSubmission {
    pub id: Option<String>,
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub episodes: Vec<CanonicalRecord>,
}

impl PodcastSubmission {
    /// Validate and turn into the container row that will be upserted.
    pub fn into_saved(self, owner: &OwnerScope) -> Result<(SavedPodcast, Vec<CanonicalRecord>)> {
        let id = self.id.filter(|v| !v.trim().is_empty());
        let title = self.title.filter(|v| !v.trim().is_empty());
        let (Some(id), Some(title)) = (id, title) else {
            return Err(CoreError::Validation(
                "podcast id and title are required".to_string(),
            ));
        };

        let episode_ids = self
            .episodes
            .iter()
            .filter_map(|e| e.id.clone())
            .collect::<Vec<_>>();

        let saved = SavedPodcast {
            id,
            owner: owner.clone(),
            title,
            publisher: self.publisher,
            image_url: self.image_url,
            episode_ids,
            updated_at: Utc::now(),
        };
        Ok((saved, self.episodes))
    }
}

/// A saved podcast with its episode rows populated, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastWithEpisodes {
    pub podcast: SavedPodcast,
    pub episodes: Vec<CanonicalRecord>,
}
