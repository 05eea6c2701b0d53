use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};
use tunecast_core::config::BatchConfig;

use crate::error::{IngestError, Result};
use crate::http::{Deadline, Sleeper};

/// Runs one worker per key in fixed-size concurrent groups, pausing between
/// groups. Groups run one after another; the pause after the last group is skipped.
pub struct BatchScheduler {
    batch_size: usize,
    inter_batch_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl BatchScheduler {
    pub fn new(
        batch_size: usize,
        inter_batch_delay: Duration,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(IngestError::Validation(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            inter_batch_delay,
            sleeper,
        })
    }

    pub fn from_config(config: &BatchConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        Self::new(config.batch_size, config.inter_batch_delay(), sleeper)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Results come back in the order of `keys`. A worker error is replaced by
    /// `fallback(key, &err)` and never affects its siblings, except
    /// [`IngestError::DeadlineExceeded`], which aborts the whole run.
    pub async fn run<'a, K, T, W, Fut, F>(
        &self,
        keys: &'a [K],
        deadline: Deadline,
        worker: W,
        fallback: F,
    ) -> Result<Vec<T>>
    where
        W: Fn(&'a K) -> Fut,
        Fut: Future<Output = Result<T>>,
        F: Fn(&'a K, &IngestError) -> T,
    {
        let mut slots: Vec<Option<T>> = keys.iter().map(|_| None).collect();
        let groups = keys.len().div_ceil(self.batch_size);

        for (group_idx, group) in keys.chunks(self.batch_size).enumerate() {
            deadline.check()?;
            let start = group_idx * self.batch_size;
            debug!(
                "batch {}/{groups}: {} keys in flight",
                group_idx + 1,
                group.len()
            );

            let in_flight = join_all(group.iter().map(&worker));
            let settled = match deadline.remaining() {
                Some(left) => tokio::time::timeout(left, in_flight)
                    .await
                    .map_err(|_| IngestError::DeadlineExceeded)?,
                None => in_flight.await,
            };

            for (offset, (key, outcome)) in group.iter().zip(settled).enumerate() {
                let value = match outcome {
                    Ok(value) => value,
                    Err(IngestError::DeadlineExceeded) => {
                        return Err(IngestError::DeadlineExceeded);
                    }
                    Err(err) => {
                        warn!("batch item {} degraded: {err}", start + offset);
                        fallback(key, &err)
                    }
                };
                slots[start + offset] = Some(value);
            }

            let is_last = group_idx + 1 == groups;
            if !is_last && !self.inter_batch_delay.is_zero() {
                deadline.check()?;
                if deadline
                    .remaining()
                    .is_some_and(|left| left <= self.inter_batch_delay)
                {
                    return Err(IngestError::DeadlineExceeded);
                }
                self.sleeper.sleep(self.inter_batch_delay).await;
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
