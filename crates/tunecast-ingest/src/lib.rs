//! Upstream catalog ingestion: rate-limited fetching, paced batch fan-out,
//! response normalization and per-owner dedup against the store.

pub mod batch;
pub mod error;
pub mod http;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod sources;

pub use batch::BatchScheduler;
pub use error::{IngestError, Result, TransientFailure};
pub use http::{
    CatalogTransport, Deadline, FetchRequest, Fetcher, ReqwestTransport, RetryPolicy, Sleeper,
    TokioSleeper,
};
pub use normalize::{ItemLayout, normalize, normalize_items, normalize_submission};
pub use pipeline::{CatalogPipeline, QueryResult, RecommendationReport, SaveReport};
pub use reconcile::{ExistingIndex, ReconcileOutcome, Reconciler, RejectReason, Rejection};
pub use sources::{ListenNotesSource, PodcastCatalog, SaavnSource, TrackCatalog};
