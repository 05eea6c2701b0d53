use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use tunecast_core::config::PaginationConfig;
use tunecast_core::{
    ActivityEntry, ActivityKind, AppConfig, CanonicalRecord, CatalogStore, HistoryView,
    NewActivity, OwnerScope, PageRequest, PodcastSubmission, PodcastSummary, PodcastWithEpisodes,
    SavedPodcast, sort_oldest_first,
};
use uuid::Uuid;

use crate::batch::BatchScheduler;
use crate::error::{IngestError, Result};
use crate::http::{Deadline, Fetcher, ReqwestTransport, RetryPolicy, TokioSleeper};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::sources::{ListenNotesSource, PodcastCatalog, SaavnSource, TrackCatalog};

/// Results of one track-search query. A failed or empty query keeps its slot
/// with no records and the error that degraded it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub ok: bool,
    pub records: Vec<CanonicalRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationReport {
    pub run_id: Uuid,
    /// Same order as the submitted queries.
    pub results: Vec<QueryResult>,
    /// Records returned across all queries, before dedup.
    pub total: usize,
    pub outcome: ReconcileOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub podcast: SavedPodcast,
    pub episodes_inserted: Vec<CanonicalRecord>,
}

/// Caller-facing entry point: wires the catalogs, the scheduler and the store
/// into the search, recommendation, library and history flows.
pub struct CatalogPipeline {
    podcasts: Arc<dyn PodcastCatalog>,
    tracks: Arc<dyn TrackCatalog>,
    store: Arc<dyn CatalogStore>,
    scheduler: BatchScheduler,
    reconciler: Reconciler,
    pagination: PaginationConfig,
    run_budget: Option<Duration>,
}

impl CatalogPipeline {
    pub fn new(
        podcasts: Arc<dyn PodcastCatalog>,
        tracks: Arc<dyn TrackCatalog>,
        store: Arc<dyn CatalogStore>,
        scheduler: BatchScheduler,
    ) -> Self {
        Self {
            podcasts,
            tracks,
            reconciler: Reconciler::new(Arc::clone(&store)),
            store,
            scheduler,
            pagination: PaginationConfig::default(),
            run_budget: None,
        }
    }

    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    /// Time budget applied to each call that fans out to upstream catalogs.
    pub fn with_run_budget(mut self, budget: Option<Duration>) -> Self {
        self.run_budget = budget;
        self
    }

    /// Production wiring: one shared reqwest client, tokio sleeps, both sources.
    pub fn from_config(config: &AppConfig, store: Arc<dyn CatalogStore>) -> Result<Self> {
        config.validate()?;
        let sleeper = Arc::new(TokioSleeper);
        let transport = Arc::new(ReqwestTransport::from_config(&config.upstream)?);
        let fetcher = Arc::new(Fetcher::new(
            transport,
            sleeper.clone(),
            config.upstream.timeout(),
        ));
        let policy = RetryPolicy::from_config(&config.retry);

        let podcasts =
            ListenNotesSource::from_config(&config.upstream, Arc::clone(&fetcher), policy)?;
        if config.upstream.resolve_api_key().is_none() {
            warn!(
                "no podcast API key configured (set upstream.api_key or ${}), \
                 podcast requests may be rejected",
                config.upstream.api_key_env
            );
        }
        let tracks = SaavnSource::from_config(&config.upstream, fetcher, policy)?;
        let scheduler = BatchScheduler::from_config(&config.batch, sleeper)?;

        Ok(Self::new(Arc::new(podcasts), Arc::new(tracks), store, scheduler)
            .with_pagination(config.pagination.clone())
            .with_run_budget(config.batch.deadline()))
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_budget(self.run_budget)
    }

    fn page(&self, page: Option<u32>, limit: Option<u32>) -> Result<PageRequest> {
        let limit = limit.or(Some(self.pagination.default_limit));
        Ok(PageRequest::bounded(page, limit, self.pagination.max_limit)?)
    }

    // ─── Podcast browsing ────────────────────────────────────────────────

    pub async fn search_podcasts(
        &self,
        query: &str,
        page: Option<u32>,
    ) -> Result<Vec<PodcastSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(IngestError::Validation("search query is required".to_string()));
        }
        let page = self.page(page, None)?;
        let deadline = self.deadline();

        let podcasts = self.podcasts.search(query, page.page, deadline).await?;
        info!("podcast search {query:?}: {} podcasts", podcasts.len());
        self.with_episodes(&podcasts, deadline).await
    }

    pub async fn best_podcasts(&self, page: Option<u32>) -> Result<Vec<PodcastSummary>> {
        let page = self.page(page, None)?;
        let deadline = self.deadline();

        let podcasts = self.podcasts.best(page.page, deadline).await?;
        info!("best podcasts page {}: {} podcasts", page.page, podcasts.len());
        self.with_episodes(&podcasts, deadline).await
    }

    /// Fetch each podcast's episodes in paced batches. A podcast without an id,
    /// or whose lookup fails, keeps its slot with no episodes.
    async fn with_episodes(
        &self,
        podcasts: &[CanonicalRecord],
        deadline: Deadline,
    ) -> Result<Vec<PodcastSummary>> {
        self.scheduler
            .run(
                podcasts,
                deadline,
                |podcast| async move {
                    let Some(id) = podcast.id.as_deref() else {
                        return Ok::<_, IngestError>(PodcastSummary::without_episodes(
                            podcast.clone(),
                        ));
                    };
                    let mut episodes = self.podcasts.podcast(id, deadline).await?.episodes;
                    sort_oldest_first(&mut episodes);
                    Ok(PodcastSummary {
                        podcast: podcast.clone(),
                        episodes,
                    })
                },
                |podcast, err| {
                    warn!(
                        "{}: episodes for {:?} unavailable: {err}",
                        self.podcasts.name(),
                        podcast.id
                    );
                    PodcastSummary::without_episodes(podcast.clone())
                },
            )
            .await
    }

    // ─── Recommendations ─────────────────────────────────────────────────

    /// Search the track catalog for every query, then keep only the tracks
    /// `owner` has not been recommended before.
    pub async fn recommend_tracks(
        &self,
        owner: &OwnerScope,
        queries: &[String],
    ) -> Result<RecommendationReport> {
        if queries.is_empty() {
            return Err(IngestError::Validation(
                "at least one query is required".to_string(),
            ));
        }
        let run_id = Uuid::now_v7();
        let deadline = self.deadline();
        info!(
            "recommendation run {run_id} for {owner}: {} queries in batches of {} via {}",
            queries.len(),
            self.scheduler.batch_size(),
            self.tracks.name()
        );

        let results = self
            .scheduler
            .run(
                queries,
                deadline,
                |query| async move {
                    let trimmed = query.trim();
                    if trimmed.is_empty() {
                        return Err(IngestError::Validation("empty query".to_string()));
                    }
                    let records = self.tracks.search(trimmed, deadline).await?;
                    Ok(QueryResult {
                        query: trimmed.to_string(),
                        ok: true,
                        records,
                        error: None,
                    })
                },
                |query, err| QueryResult {
                    query: query.trim().to_string(),
                    ok: false,
                    records: Vec::new(),
                    error: Some(err.to_string()),
                },
            )
            .await?;

        let candidates: Vec<CanonicalRecord> = results
            .iter()
            .flat_map(|r| r.records.iter().cloned())
            .collect();
        let total = candidates.len();
        let outcome = self.reconciler.reconcile(owner, candidates)?;

        info!(
            "recommendation run {run_id}: {total} fetched, {} new",
            outcome.accepted.len()
        );
        Ok(RecommendationReport {
            run_id,
            results,
            total,
            outcome,
        })
    }

    pub fn previously_recommended(
        &self,
        owner: &OwnerScope,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Vec<CanonicalRecord>> {
        let page = self.page(page, limit)?;
        Ok(self.store.list_recommendations(owner, page)?)
    }

    // ─── Saved podcasts ──────────────────────────────────────────────────

    /// Upsert the podcast row, then store only the episodes not seen before.
    pub fn save_podcast(
        &self,
        owner: &OwnerScope,
        submission: PodcastSubmission,
    ) -> Result<SaveReport> {
        let (saved, episodes) = submission.into_saved(owner)?;
        let podcast = self.store.upsert_podcast(&saved)?;

        let existing = self.store.existing_episode_ids(&saved.episode_ids)?;
        let novel: Vec<CanonicalRecord> = episodes
            .into_iter()
            .filter(|e| e.id.as_ref().is_some_and(|id| !existing.contains(id)))
            .collect();
        let episodes_inserted = self.store.insert_episodes_if_absent(&novel)?;

        info!(
            "saved podcast {} for {owner}: {} new episodes",
            podcast.id,
            episodes_inserted.len()
        );
        Ok(SaveReport {
            podcast,
            episodes_inserted,
        })
    }

    /// Pick up the newest upstream episode of a saved podcast, then return the
    /// stored episodes oldest first. An upstream failure only skips the refresh.
    pub async fn refresh_saved_podcast(
        &self,
        owner: &OwnerScope,
        podcast_id: &str,
    ) -> Result<PodcastWithEpisodes> {
        let podcast_id = podcast_id.trim();
        if podcast_id.is_empty() {
            return Err(IngestError::Validation("podcast id is required".to_string()));
        }
        let mut saved = self
            .store
            .saved_podcast(owner, podcast_id)?
            .ok_or_else(|| IngestError::NotFound(format!("saved podcast {podcast_id}")))?;

        match self.podcasts.podcast(podcast_id, self.deadline()).await {
            Ok(remote) => {
                let newest = newest_episode(&remote.episodes)
                    .filter(|e| e.id.as_ref().is_some_and(|id| !saved.episode_ids.contains(id)));
                if let Some(newest) = newest {
                    self.store
                        .insert_episodes_if_absent(std::slice::from_ref(newest))?;
                    let id = newest.id.clone().unwrap_or_default();
                    saved.prepend_episode(&id);
                    saved.updated_at = Utc::now();
                    saved = self.store.upsert_podcast(&saved)?;
                    info!("podcast {podcast_id}: new episode {id}");
                }
            }
            Err(err) if err.is_fatal_upstream() => warn!(
                "{}: podcast {podcast_id} refresh skipped: {err}",
                self.podcasts.name()
            ),
            Err(err) => return Err(err),
        }

        let mut episodes = self.store.episodes_by_ids(&saved.episode_ids)?;
        sort_oldest_first(&mut episodes);
        Ok(PodcastWithEpisodes {
            podcast: saved,
            episodes,
        })
    }

    pub fn saved_podcasts(&self, owner: &OwnerScope) -> Result<Vec<SavedPodcast>> {
        Ok(self.store.saved_podcasts(owner)?)
    }

    // ─── Activity ────────────────────────────────────────────────────────

    pub fn record_activity(
        &self,
        owner: &OwnerScope,
        kind: ActivityKind,
        container_id: Option<String>,
        item_id: &str,
        progress: Option<i64>,
    ) -> Result<ActivityEntry> {
        let activity = NewActivity::new(owner.clone(), kind, container_id, item_id, progress)?;
        Ok(self.store.touch_activity(&activity)?)
    }

    /// Newest first, each entry joined with the podcast and episode (or track)
    /// it refers to. Referenced rows are loaded in bulk, not per entry.
    pub fn activity_history(
        &self,
        owner: &OwnerScope,
        kind: ActivityKind,
    ) -> Result<Vec<HistoryView>> {
        let entries = self.store.activity_for_owner(owner, kind)?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let (containers, items) = match kind {
            ActivityKind::Episode => {
                let podcast_ids = unique(entries.iter().filter_map(|e| e.container_id.clone()));
                let episode_ids = unique(entries.iter().map(|e| e.item_id.clone()));
                let containers = self
                    .store
                    .podcasts_by_ids(owner, &podcast_ids)?
                    .iter()
                    .map(|p| (p.id.clone(), p.to_record()))
                    .collect();
                let items = by_id(self.store.episodes_by_ids(&episode_ids)?);
                (containers, items)
            }
            ActivityKind::Track => {
                let mut items = HashMap::new();
                for record in self.store.recommendations_for_owner(owner)? {
                    for key in [record.id.clone(), record.media_url.clone()]
                        .into_iter()
                        .flatten()
                    {
                        items.entry(key).or_insert_with(|| record.clone());
                    }
                }
                (HashMap::new(), items)
            }
        };

        Ok(entries
            .into_iter()
            .map(|entry| HistoryView {
                container: entry
                    .container_id
                    .as_ref()
                    .and_then(|id| containers.get(id))
                    .cloned(),
                item: items.get(&entry.item_id).cloned(),
                entry,
            })
            .collect())
    }
}

/// Latest by publication time; falls back to the first listed when no
/// episode carries a date.
fn newest_episode(episodes: &[CanonicalRecord]) -> Option<&CanonicalRecord> {
    episodes
        .iter()
        .filter(|e| e.published_at.is_some())
        .max_by_key(|e| e.published_at)
        .or_else(|| episodes.first())
}

fn unique(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

fn by_id(records: Vec<CanonicalRecord>) -> HashMap<String, CanonicalRecord> {
    records
        .into_iter()
        .filter_map(|r| r.id.clone().map(|id| (id, r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;
    use tunecast_core::{CoreError, SqliteCatalogStore};

    use super::*;
    use crate::error::TransientFailure;
    use crate::http::testing::RecordingSleeper;

    #[derive(Default)]
    struct FakePodcasts {
        listing: Vec<CanonicalRecord>,
        episodes: Mutex<HashMap<String, Vec<CanonicalRecord>>>,
        failing: HashSet<String>,
    }

    impl FakePodcasts {
        fn set_episodes(&self, podcast_id: &str, episodes: Vec<CanonicalRecord>) {
            self.episodes
                .lock()
                .unwrap()
                .insert(podcast_id.to_string(), episodes);
        }
    }

    #[async_trait]
    impl PodcastCatalog for FakePodcasts {
        fn name(&self) -> &str {
            "fake podcasts"
        }

        async fn search(
            &self,
            _query: &str,
            _page: u32,
            _deadline: Deadline,
        ) -> Result<Vec<CanonicalRecord>> {
            Ok(self.listing.clone())
        }

        async fn best(&self, _page: u32, _deadline: Deadline) -> Result<Vec<CanonicalRecord>> {
            Ok(self.listing.clone())
        }

        async fn podcast(&self, id: &str, _deadline: Deadline) -> Result<PodcastSummary> {
            if self.failing.contains(id) {
                return Err(IngestError::UpstreamUnavailable {
                    url: format!("fake://podcasts/{id}"),
                    attempts: 4,
                    last_error: TransientFailure::Status(429),
                });
            }
            let episodes = self.episodes.lock().unwrap().get(id).cloned();
            match episodes {
                Some(episodes) => Ok(PodcastSummary {
                    podcast: podcast(id),
                    episodes,
                }),
                None => Err(IngestError::UpstreamRejected {
                    url: format!("fake://podcasts/{id}"),
                    status: 404,
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeTracks {
        by_query: HashMap<String, Vec<CanonicalRecord>>,
    }

    #[async_trait]
    impl TrackCatalog for FakeTracks {
        fn name(&self) -> &str {
            "fake tracks"
        }

        async fn search(&self, query: &str, _deadline: Deadline) -> Result<Vec<CanonicalRecord>> {
            Ok(self.by_query.get(query).cloned().unwrap_or_default())
        }
    }

    fn podcast(id: &str) -> CanonicalRecord {
        CanonicalRecord {
            id: Some(id.to_string()),
            title: Some(format!("Podcast {id}")),
            ..Default::default()
        }
    }

    fn episode(id: &str, published_ms: Option<i64>) -> CanonicalRecord {
        CanonicalRecord {
            id: Some(id.to_string()),
            title: Some(format!("Episode {id}")),
            published_at: published_ms.and_then(DateTime::from_timestamp_millis),
            ..Default::default()
        }
    }

    fn track(media_url: Option<&str>, title: &str) -> CanonicalRecord {
        CanonicalRecord {
            title: Some(title.to_string()),
            media_url: media_url.map(ToOwned::to_owned),
            ..Default::default()
        }
    }

    fn owner() -> OwnerScope {
        OwnerScope::new("user-1").unwrap()
    }

    fn pipeline(podcasts: Arc<FakePodcasts>, tracks: FakeTracks) -> CatalogPipeline {
        let scheduler = BatchScheduler::new(
            3,
            Duration::from_millis(500),
            Arc::new(RecordingSleeper::default()),
        )
        .unwrap();
        CatalogPipeline::new(
            podcasts,
            Arc::new(tracks),
            Arc::new(SqliteCatalogStore::open_in_memory().unwrap()),
            scheduler,
        )
    }

    fn ids(records: &[CanonicalRecord]) -> Vec<&str> {
        records.iter().filter_map(|r| r.id.as_deref()).collect()
    }

    #[tokio::test]
    async fn search_attaches_sorted_episodes_and_degrades_failures() {
        let anonymous = CanonicalRecord::new("No Id");
        let fake = FakePodcasts {
            listing: vec![podcast("p1"), anonymous, podcast("p2"), podcast("p3")],
            failing: HashSet::from(["p2".to_string()]),
            ..Default::default()
        };
        fake.set_episodes(
            "p1",
            vec![
                episode("e300", Some(300)),
                episode("e100", Some(100)),
                episode("enone", None),
                episode("e200", Some(200)),
            ],
        );
        fake.set_episodes("p3", vec![episode("x", Some(1))]);

        let out = pipeline(Arc::new(fake), FakeTracks::default())
            .search_podcasts("serial", None)
            .await
            .unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(ids(&out[0].episodes), vec!["e100", "e200", "e300", "enone"]);
        assert_eq!(out[1].podcast.title.as_deref(), Some("No Id"));
        assert!(out[1].episodes.is_empty());
        assert_eq!(out[2].podcast.id.as_deref(), Some("p2"));
        assert!(out[2].episodes.is_empty());
        assert_eq!(ids(&out[3].episodes), vec!["x"]);
    }

    #[tokio::test]
    async fn search_rejects_blank_query_and_bad_page() {
        let pipeline = pipeline(Arc::new(FakePodcasts::default()), FakeTracks::default());
        assert!(matches!(
            pipeline.search_podcasts("  ", None).await,
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            pipeline.search_podcasts("ok", Some(0)).await,
            Err(IngestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn recommendations_are_deduplicated_across_runs() {
        let tracks = FakeTracks {
            by_query: HashMap::from([
                (
                    "jazz".to_string(),
                    vec![track(Some("a"), "X"), track(Some("a"), "Y")],
                ),
                (
                    "rock".to_string(),
                    vec![track(Some("b"), "Z"), track(None, "Solo")],
                ),
            ]),
        };
        let pipeline = pipeline(Arc::new(FakePodcasts::default()), tracks);
        let queries = vec!["jazz".to_string(), "   ".to_string(), "rock".to_string()];

        let report = pipeline.recommend_tracks(&owner(), &queries).await.unwrap();
        assert_eq!(report.results.len(), 3);
        assert!(report.results[0].ok);
        assert!(!report.results[1].ok);
        assert!(report.results[1].error.is_some());
        assert_eq!(report.results[2].query, "rock");
        assert_eq!(report.total, 4);
        assert_eq!(report.outcome.accepted.len(), 3);

        let again = pipeline.recommend_tracks(&owner(), &queries).await.unwrap();
        assert!(again.outcome.accepted.is_empty());

        let stored = pipeline
            .previously_recommended(&owner(), None, None)
            .unwrap();
        assert_eq!(stored.len(), 3);
    }

    /// Reads go to SQLite; recommendation inserts always fail.
    struct UnwritableStore {
        inner: SqliteCatalogStore,
    }

    impl CatalogStore for UnwritableStore {
        fn recommendations_for_owner(
            &self,
            owner: &OwnerScope,
        ) -> tunecast_core::Result<Vec<CanonicalRecord>> {
            self.inner.recommendations_for_owner(owner)
        }

        fn list_recommendations(
            &self,
            owner: &OwnerScope,
            page: PageRequest,
        ) -> tunecast_core::Result<Vec<CanonicalRecord>> {
            self.inner.list_recommendations(owner, page)
        }

        fn insert_recommendations(
            &self,
            _owner: &OwnerScope,
            _records: &[CanonicalRecord],
        ) -> tunecast_core::Result<usize> {
            Err(CoreError::Io(std::io::Error::other("disk full")))
        }

        fn existing_episode_ids(&self, ids: &[String]) -> tunecast_core::Result<HashSet<String>> {
            self.inner.existing_episode_ids(ids)
        }

        fn episodes_by_ids(&self, ids: &[String]) -> tunecast_core::Result<Vec<CanonicalRecord>> {
            self.inner.episodes_by_ids(ids)
        }

        fn insert_episodes_if_absent(
            &self,
            records: &[CanonicalRecord],
        ) -> tunecast_core::Result<Vec<CanonicalRecord>> {
            self.inner.insert_episodes_if_absent(records)
        }

        fn upsert_podcast(&self, podcast: &SavedPodcast) -> tunecast_core::Result<SavedPodcast> {
            self.inner.upsert_podcast(podcast)
        }

        fn saved_podcast(
            &self,
            owner: &OwnerScope,
            id: &str,
        ) -> tunecast_core::Result<Option<SavedPodcast>> {
            self.inner.saved_podcast(owner, id)
        }

        fn saved_podcasts(&self, owner: &OwnerScope) -> tunecast_core::Result<Vec<SavedPodcast>> {
            self.inner.saved_podcasts(owner)
        }

        fn podcasts_by_ids(
            &self,
            owner: &OwnerScope,
            ids: &[String],
        ) -> tunecast_core::Result<Vec<SavedPodcast>> {
            self.inner.podcasts_by_ids(owner, ids)
        }

        fn touch_activity(&self, activity: &NewActivity) -> tunecast_core::Result<ActivityEntry> {
            self.inner.touch_activity(activity)
        }

        fn activity_for_owner(
            &self,
            owner: &OwnerScope,
            kind: ActivityKind,
        ) -> tunecast_core::Result<Vec<ActivityEntry>> {
            self.inner.activity_for_owner(owner, kind)
        }
    }

    #[tokio::test]
    async fn store_failure_aborts_recommendation_run() {
        let tracks = FakeTracks {
            by_query: HashMap::from([("jazz".to_string(), vec![track(Some("m1"), "Blue")])]),
        };
        let scheduler = BatchScheduler::new(
            3,
            Duration::from_millis(500),
            Arc::new(RecordingSleeper::default()),
        )
        .unwrap();
        let pipeline = CatalogPipeline::new(
            Arc::new(FakePodcasts::default()),
            Arc::new(tracks),
            Arc::new(UnwritableStore {
                inner: SqliteCatalogStore::open_in_memory().unwrap(),
            }),
            scheduler,
        );

        let err = pipeline
            .recommend_tracks(&owner(), &["jazz".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Store(CoreError::Io(_))));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn spent_run_budget_stops_before_any_fetch() {
        let tracks = FakeTracks {
            by_query: HashMap::from([("jazz".to_string(), vec![track(Some("m1"), "Blue")])]),
        };
        let pipeline = pipeline(Arc::new(FakePodcasts::default()), tracks)
            .with_run_budget(Some(Duration::ZERO));

        assert!(matches!(
            pipeline
                .recommend_tracks(&owner(), &["jazz".to_string()])
                .await,
            Err(IngestError::DeadlineExceeded)
        ));
        assert!(
            pipeline
                .previously_recommended(&owner(), None, None)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn recommendations_need_at_least_one_query() {
        let pipeline = pipeline(Arc::new(FakePodcasts::default()), FakeTracks::default());
        assert!(matches!(
            pipeline.recommend_tracks(&owner(), &[]).await,
            Err(IngestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn save_then_refresh_picks_up_new_episode() {
        let fake = Arc::new(FakePodcasts::default());
        let pipeline = pipeline(fake.clone(), FakeTracks::default());
        let submission = PodcastSubmission {
            id: Some("p1".to_string()),
            title: Some("Show".to_string()),
            episodes: vec![episode("e1", Some(100)), episode("e2", Some(200))],
            ..Default::default()
        };

        let saved = pipeline.save_podcast(&owner(), submission.clone()).unwrap();
        assert_eq!(saved.episodes_inserted.len(), 2);
        let resaved = pipeline.save_podcast(&owner(), submission).unwrap();
        assert!(resaved.episodes_inserted.is_empty());

        fake.set_episodes(
            "p1",
            vec![episode("e3", Some(300)), episode("e2", Some(200))],
        );
        let refreshed = pipeline
            .refresh_saved_podcast(&owner(), "p1")
            .await
            .unwrap();
        assert_eq!(refreshed.podcast.episode_ids, vec!["e3", "e1", "e2"]);
        assert_eq!(ids(&refreshed.episodes), vec!["e1", "e2", "e3"]);

        let again = pipeline
            .refresh_saved_podcast(&owner(), "p1")
            .await
            .unwrap();
        assert_eq!(again.podcast.episode_ids, vec!["e3", "e1", "e2"]);
        assert_eq!(pipeline.saved_podcasts(&owner()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refresh_survives_upstream_failure_and_reports_missing() {
        let fake = Arc::new(FakePodcasts {
            failing: HashSet::from(["p1".to_string()]),
            ..Default::default()
        });
        let pipeline = pipeline(fake, FakeTracks::default());
        pipeline
            .save_podcast(
                &owner(),
                PodcastSubmission {
                    id: Some("p1".to_string()),
                    title: Some("Show".to_string()),
                    episodes: vec![episode("e1", None), episode("e0", Some(5))],
                    ..Default::default()
                },
            )
            .unwrap();

        let refreshed = pipeline
            .refresh_saved_podcast(&owner(), "p1")
            .await
            .unwrap();
        assert_eq!(ids(&refreshed.episodes), vec!["e0", "e1"]);

        assert!(matches!(
            pipeline.refresh_saved_podcast(&owner(), "missing").await,
            Err(IngestError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn episode_history_is_newest_first_and_populated() {
        let pipeline = pipeline(Arc::new(FakePodcasts::default()), FakeTracks::default());
        pipeline
            .save_podcast(
                &owner(),
                PodcastSubmission {
                    id: Some("p1".to_string()),
                    title: Some("Show".to_string()),
                    episodes: vec![episode("e1", Some(1)), episode("e2", Some(2))],
                    ..Default::default()
                },
            )
            .unwrap();

        let play = |item: &str| {
            pipeline
                .record_activity(
                    &owner(),
                    ActivityKind::Episode,
                    Some("p1".to_string()),
                    item,
                    None,
                )
                .unwrap()
        };
        play("e1");
        std::thread::sleep(Duration::from_millis(2));
        play("e2");
        std::thread::sleep(Duration::from_millis(2));
        play("e1");

        let history = pipeline
            .activity_history(&owner(), ActivityKind::Episode)
            .unwrap();
        let items: Vec<_> = history.iter().map(|h| h.entry.item_id.as_str()).collect();
        assert_eq!(items, vec!["e1", "e2"]);
        assert_eq!(
            history[0].container.as_ref().and_then(|c| c.title.as_deref()),
            Some("Show")
        );
        assert_eq!(
            history[1].item.as_ref().and_then(|i| i.id.as_deref()),
            Some("e2")
        );

        assert!(matches!(
            pipeline.record_activity(&owner(), ActivityKind::Episode, None, "e1", None),
            Err(IngestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn track_history_resolves_recommended_tracks() {
        let tracks = FakeTracks {
            by_query: HashMap::from([("jazz".to_string(), vec![track(Some("m1"), "Blue")])]),
        };
        let pipeline = pipeline(Arc::new(FakePodcasts::default()), tracks);
        pipeline
            .recommend_tracks(&owner(), &["jazz".to_string()])
            .await
            .unwrap();

        pipeline
            .record_activity(&owner(), ActivityKind::Track, None, "m1", None)
            .unwrap();
        pipeline
            .record_activity(&owner(), ActivityKind::Track, None, "unknown", None)
            .unwrap();

        let history = pipeline
            .activity_history(&owner(), ActivityKind::Track)
            .unwrap();
        assert_eq!(history.len(), 2);
        let blue = history.iter().find(|h| h.entry.item_id == "m1").unwrap();
        assert_eq!(blue.item.as_ref().and_then(|i| i.title.as_deref()), Some("Blue"));
        assert!(history.iter().any(|h| h.item.is_none()));
    }
}
