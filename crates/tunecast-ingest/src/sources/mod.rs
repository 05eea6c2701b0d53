use async_trait::async_trait;
use tunecast_core::{CanonicalRecord, PodcastSummary};

use crate::error::{IngestError, Result};
use crate::http::Deadline;

pub mod listen_notes;
pub mod saavn;

pub use listen_notes::ListenNotesSource;
pub use saavn::SaavnSource;

/// Podcast directory: search, curated lists and per-podcast episode lookups.
#[async_trait]
pub trait PodcastCatalog: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, page: u32, deadline: Deadline)
    -> Result<Vec<CanonicalRecord>>;

    async fn best(&self, page: u32, deadline: Deadline) -> Result<Vec<CanonicalRecord>>;

    /// The podcast's own record plus its episodes as the upstream lists them.
    async fn podcast(&self, id: &str, deadline: Deadline) -> Result<PodcastSummary>;
}

#[async_trait]
pub trait TrackCatalog: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, deadline: Deadline) -> Result<Vec<CanonicalRecord>>;
}

/// Accepts absolute http(s) URLs only.
pub(crate) fn validate_base_url(base_url: &str) -> Result<()> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| IngestError::InvalidUrl(format!("{base_url}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(IngestError::InvalidUrl(format!(
            "{base_url}: unsupported scheme {other}"
        ))),
    }
}
