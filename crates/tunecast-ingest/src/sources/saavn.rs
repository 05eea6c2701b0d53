use std::sync::Arc;

use async_trait::async_trait;
use tunecast_core::CanonicalRecord;
use tunecast_core::config::UpstreamConfig;

use crate::error::Result;
use crate::http::{Deadline, FetchRequest, Fetcher, RetryPolicy};
use crate::normalize::{ItemLayout, normalize_items};
use crate::sources::{TrackCatalog, validate_base_url};

/// Keyless track search, `GET {base}?query=<q>`.
pub struct SaavnSource {
    fetcher: Arc<Fetcher>,
    policy: RetryPolicy,
    base_url: String,
}

impl SaavnSource {
    pub fn from_config(
        config: &UpstreamConfig,
        fetcher: Arc<Fetcher>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        Self::with_params(&config.track_base_url, fetcher, policy)
    }

    pub fn with_params(base_url: &str, fetcher: Arc<Fetcher>, policy: RetryPolicy) -> Result<Self> {
        validate_base_url(base_url)?;
        Ok(Self {
            fetcher,
            policy,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl TrackCatalog for SaavnSource {
    fn name(&self) -> &str {
        "Saavn"
    }

    async fn search(&self, query: &str, deadline: Deadline) -> Result<Vec<CanonicalRecord>> {
        let url = format!("{}?query={}", self.base_url, urlencoding::encode(query));
        let payload = self
            .fetcher
            .fetch_json(&FetchRequest::get(url), &self.policy, deadline)
            .await?;
        Ok(normalize_items(&payload, ItemLayout::TRACKS))
    }
}
