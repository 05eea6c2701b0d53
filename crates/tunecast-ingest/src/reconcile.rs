use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use tunecast_core::{CanonicalRecord, CatalogStore, OwnerScope};

use crate::error::Result;

/// Membership set over what an owner already has, keyed by media URL with a
/// trimmed, case-folded title as the fallback key.
#[derive(Debug, Clone, Default)]
pub struct ExistingIndex {
    media_urls: HashSet<String>,
    titles: HashSet<String>,
}

impl ExistingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CanonicalRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn insert(&mut self, record: &CanonicalRecord) {
        if let Some(url) = &record.media_url {
            self.media_urls.insert(url.clone());
        }
        if let Some(key) = record.title_key() {
            self.titles.insert(key);
        }
    }

    /// The title is only consulted when the candidate has no media URL.
    pub fn contains(&self, candidate: &CanonicalRecord) -> bool {
        match &candidate.media_url {
            Some(url) => self.media_urls.contains(url),
            None => candidate
                .title_key()
                .is_some_and(|key| self.titles.contains(&key)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Neither a media URL nor a title to recognise it by later.
    Ineligible,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub record: CanonicalRecord,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub accepted: Vec<CanonicalRecord>,
    pub rejected: Vec<Rejection>,
    /// Rows the store actually wrote; lower than `accepted.len()` only when a
    /// concurrent caller inserted the same records first.
    pub inserted: usize,
}

/// Split `candidates` against `index`. Accepted records join the index as they
/// are seen, so the first of several equal candidates wins.
pub fn partition(
    index: &mut ExistingIndex,
    candidates: impl IntoIterator<Item = CanonicalRecord>,
) -> (Vec<CanonicalRecord>, Vec<Rejection>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for record in candidates {
        let reason = if !record.is_eligible() {
            Some(RejectReason::Ineligible)
        } else if index.contains(&record) {
            Some(RejectReason::Duplicate)
        } else {
            None
        };

        match reason {
            Some(reason) => rejected.push(Rejection { record, reason }),
            None => {
                index.insert(&record);
                accepted.push(record);
            }
        }
    }
    (accepted, rejected)
}

pub struct Reconciler {
    store: Arc<dyn CatalogStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// One bulk read builds the index, one bulk insert writes the novel subset.
    pub fn reconcile(
        &self,
        owner: &OwnerScope,
        candidates: Vec<CanonicalRecord>,
    ) -> Result<ReconcileOutcome> {
        let existing = self.store.recommendations_for_owner(owner)?;
        let mut index = ExistingIndex::from_records(&existing);
        debug!(
            "reconcile for {owner}: {} existing, {} candidates",
            existing.len(),
            candidates.len()
        );

        let (accepted, rejected) = partition(&mut index, candidates);
        let inserted = if accepted.is_empty() {
            0
        } else {
            self.store.insert_recommendations(owner, &accepted)?
        };

        info!(
            "reconcile for {owner}: {} accepted, {} rejected, {inserted} inserted",
            accepted.len(),
            rejected.len()
        );
        Ok(ReconcileOutcome {
            accepted,
            rejected,
            inserted,
        })
    }
}
