use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tunecast_core::config::UpstreamConfig;
use tunecast_core::{CanonicalRecord, PodcastSummary};

use crate::error::Result;
use crate::http::{Deadline, FetchRequest, Fetcher, RetryPolicy};
use crate::normalize::{ItemLayout, normalize, normalize_items};
use crate::sources::{PodcastCatalog, validate_base_url};

pub const API_KEY_HEADER: &str = "X-ListenAPI-Key";

pub struct ListenNotesSource {
    fetcher: Arc<Fetcher>,
    policy: RetryPolicy,
    base_url: String,
    api_key: Option<String>,
    genre_id: String,
    region: String,
}

impl ListenNotesSource {
    pub fn from_config(
        config: &UpstreamConfig,
        fetcher: Arc<Fetcher>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let mut source = Self::with_params(
            &config.podcast_base_url,
            fetcher,
            policy,
            config.resolve_api_key(),
        )?;
        source.genre_id = config.best_podcasts_genre.clone();
        source.region = config.best_podcasts_region.clone();
        Ok(source)
    }

    pub fn with_params(
        base_url: &str,
        fetcher: Arc<Fetcher>,
        policy: RetryPolicy,
        api_key: Option<String>,
    ) -> Result<Self> {
        validate_base_url(base_url)?;
        let defaults = UpstreamConfig::default();
        Ok(Self {
            fetcher,
            policy,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            genre_id: defaults.best_podcasts_genre,
            region: defaults.best_podcasts_region,
        })
    }

    fn request(&self, url: String) -> FetchRequest {
        let request = FetchRequest::get(url);
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key.clone()),
            None => request,
        }
    }

    async fn get(&self, url: String, deadline: Deadline) -> Result<Value> {
        let request = self.request(url);
        self.fetcher.fetch_json(&request, &self.policy, deadline).await
    }
}

#[async_trait]
impl PodcastCatalog for ListenNotesSource {
    fn name(&self) -> &str {
        "Listen Notes"
    }

    async fn search(
        &self,
        query: &str,
        page: u32,
        deadline: Deadline,
    ) -> Result<Vec<CanonicalRecord>> {
        let url = format!(
            "{}/search?q={}&type=podcast&sort_by_date=0&page={page}",
            self.base_url,
            urlencoding::encode(query)
        );
        let payload = self.get(url, deadline).await?;
        Ok(normalize_items(&payload, ItemLayout::PODCAST_SEARCH))
    }

    async fn best(&self, page: u32, deadline: Deadline) -> Result<Vec<CanonicalRecord>> {
        let url = format!(
            "{}/best_podcasts?genre_id={}&page={page}&region={}&sort=listen_score&safe_mode=0",
            self.base_url,
            urlencoding::encode(&self.genre_id),
            urlencoding::encode(&self.region)
        );
        let payload = self.get(url, deadline).await?;
        Ok(normalize_items(&payload, ItemLayout::BEST_PODCASTS))
    }

    async fn podcast(&self, id: &str, deadline: Deadline) -> Result<PodcastSummary> {
        let url = format!(
            "{}/podcasts/{}?sort=recent_first",
            self.base_url,
            urlencoding::encode(id)
        );
        let payload = self.get(url, deadline).await?;
        Ok(PodcastSummary {
            podcast: normalize(&payload),
            episodes: normalize_items(&payload, ItemLayout::EPISODES),
        })
    }
}
