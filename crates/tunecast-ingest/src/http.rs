use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};
use tunecast_core::config::{RetryConfig, UpstreamConfig};

use crate::error::{IngestError, Result, TransientFailure};

// ─── Transport ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// One raw HTTP exchange, no retries.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn send(&self, request: &FetchRequest)
    -> std::result::Result<TransportResponse, TransientFailure>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        Self::new(&config.user_agent)
    }
}

#[async_trait]
impl CatalogTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &FetchRequest,
    ) -> std::result::Result<TransportResponse, TransientFailure> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let resp = builder.send().await.map_err(classify_reqwest_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransientFailure {
    if err.is_timeout() {
        TransientFailure::Timeout
    } else {
        TransientFailure::Network(err.to_string())
    }
}

// ─── Sleeper ──────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ─── Deadline ─────────────────────────────────────────────────────────────────

/// Caller-level time budget shared by every suspension point of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    pub fn from_budget(budget: Option<Duration>) -> Self {
        budget.map(Self::after).unwrap_or_default()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            return Err(IngestError::DeadlineExceeded);
        }
        Ok(())
    }

    /// The shorter of `limit` and whatever budget is left.
    pub fn clamp(&self, limit: Duration) -> Duration {
        self.remaining().map_or(limit, |left| left.min(limit))
    }
}

// ─── Retry policy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_jitter: config.max_jitter(),
        }
    }

    /// `base_delay * 2^(attempt-1)`, jitter excluded. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

// ─── Fetcher ──────────────────────────────────────────────────────────────────

pub struct Fetcher {
    transport: Arc<dyn CatalogTransport>,
    sleeper: Arc<dyn Sleeper>,
    timeout: Duration,
    rng: Mutex<StdRng>,
}

enum Attempt {
    Done(Value),
    Retry(TransientFailure),
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        sleeper: Arc<dyn Sleeper>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            sleeper,
            timeout,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// GET `request` and parse the body as JSON, retrying transient failures
    /// (timeout, network error, 429, 5xx) up to `policy.max_attempts` tries.
    pub async fn fetch_json(
        &self,
        request: &FetchRequest,
        policy: &RetryPolicy,
        deadline: Deadline,
    ) -> Result<Value> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            deadline.check()?;
            attempt += 1;

            let failure = match self.attempt(request, deadline).await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry(failure) => failure,
            };

            if attempt >= max_attempts {
                warn!(
                    "{}: giving up after {attempt} attempts, last error: {failure}",
                    request.url
                );
                return Err(IngestError::UpstreamUnavailable {
                    url: request.url.clone(),
                    attempts: attempt,
                    last_error: failure,
                });
            }

            let delay = policy.backoff(attempt) + self.jitter(policy.max_jitter);
            if deadline.remaining().is_some_and(|left| left <= delay) {
                return Err(IngestError::DeadlineExceeded);
            }
            warn!(
                "{}: attempt {attempt}/{max_attempts} failed ({failure}), retrying in {}ms",
                request.url,
                delay.as_millis()
            );
            self.sleeper.sleep(delay).await;
        }
    }

    async fn attempt(&self, request: &FetchRequest, deadline: Deadline) -> Result<Attempt> {
        let limit = deadline.clamp(self.timeout);
        let response = match tokio::time::timeout(limit, self.transport.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(failure)) => return Ok(Attempt::Retry(failure)),
            Err(_) if deadline.is_expired() => return Err(IngestError::DeadlineExceeded),
            Err(_) => return Ok(Attempt::Retry(TransientFailure::Timeout)),
        };

        match response.status {
            200..=299 => serde_json::from_str(&response.body)
                .map(Attempt::Done)
                .map_err(|e| IngestError::MalformedResponse {
                    url: request.url.clone(),
                    message: e.to_string(),
                }),
            429 | 500..=599 => Ok(Attempt::Retry(TransientFailure::Status(response.status))),
            status => {
                debug!("{}: rejected with HTTP {status}", request.url);
                Err(IngestError::UpstreamRejected {
                    url: request.url.clone(),
                    status,
                })
            }
        }
    }

    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_millis(rng.random_range(0..=max_ms))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Replays a fixed list of outcomes; the last one repeats forever.
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<std::result::Result<TransportResponse, TransientFailure>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new(
            script: Vec<std::result::Result<TransportResponse, TransientFailure>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn statuses(statuses: &[u16], body: &str) -> Arc<Self> {
            Self::new(
                statuses
                    .iter()
                    .map(|&status| {
                        Ok(TransportResponse {
                            status,
                            body: body.to_string(),
                        })
                    })
                    .collect(),
            )
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CatalogTransport for ScriptedTransport {
        async fn send(
            &self,
            _request: &FetchRequest,
        ) -> std::result::Result<TransportResponse, TransientFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingSleeper {
        pub delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn delays(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::Server;

    use super::testing::{RecordingSleeper, ScriptedTransport};
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::ZERO,
        }
    }

    fn make_fetcher(transport: Arc<ScriptedTransport>, sleeper: Arc<RecordingSleeper>) -> Fetcher {
        Fetcher::new(transport, sleeper, Duration::from_secs(7)).with_seed(7)
    }

    #[tokio::test]
    async fn retries_rate_limit_until_success() {
        let transport = ScriptedTransport::statuses(&[429, 429, 200], r#"{"q":"jazz"}"#);
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = make_fetcher(transport.clone(), sleeper.clone());

        let body = fetcher
            .fetch_json(&FetchRequest::get("http://x/jazz"), &policy(3), Deadline::none())
            .await
            .unwrap();

        assert_eq!(body["q"], "jazz");
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_as_unavailable() {
        let transport = ScriptedTransport::statuses(&[429, 429, 200], "{}");
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = make_fetcher(transport.clone(), sleeper);

        let err = fetcher
            .fetch_json(&FetchRequest::get("http://x/jazz"), &policy(2), Deadline::none())
            .await
            .unwrap_err();

        match err {
            IngestError::UpstreamUnavailable {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, TransientFailure::Status(429));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn always_rate_limited_uses_every_attempt_with_growing_delays() {
        let transport = ScriptedTransport::statuses(&[429], "{}");
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = Fetcher::new(transport.clone(), sleeper.clone(), Duration::from_secs(7))
            .with_seed(42);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(200),
        };

        let result = fetcher
            .fetch_json(&FetchRequest::get("http://x"), &policy, Deadline::none())
            .await;

        assert!(matches!(result, Err(IngestError::UpstreamUnavailable { .. })));
        assert_eq!(transport.calls(), 5);

        let delays = sleeper.delays();
        assert_eq!(delays.len(), 4);
        for (i, delay) in delays.iter().enumerate() {
            let backoff = policy.backoff(i as u32 + 1);
            assert!(*delay >= backoff && *delay <= backoff + policy.max_jitter);
        }
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_client_errors_are_not() {
        let transport = ScriptedTransport::statuses(&[503, 200], "[]");
        let fetcher = make_fetcher(transport.clone(), Arc::new(RecordingSleeper::default()));
        fetcher
            .fetch_json(&FetchRequest::get("http://x"), &policy(3), Deadline::none())
            .await
            .unwrap();
        assert_eq!(transport.calls(), 2);

        let transport = ScriptedTransport::statuses(&[404, 200], "{}");
        let fetcher = make_fetcher(transport.clone(), Arc::new(RecordingSleeper::default()));
        let err = fetcher
            .fetch_json(&FetchRequest::get("http://x"), &policy(3), Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UpstreamRejected { status: 404, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_not_retried() {
        let transport = ScriptedTransport::statuses(&[200], "<html>");
        let fetcher = make_fetcher(transport.clone(), Arc::new(RecordingSleeper::default()));
        let err = fetcher
            .fetch_json(&FetchRequest::get("http://x"), &policy(4), Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MalformedResponse { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn network_failures_are_transient() {
        let transport = ScriptedTransport::new(vec![
            Err(TransientFailure::Network("connection reset".to_string())),
            Ok(TransportResponse {
                status: 200,
                body: "{}".to_string(),
            }),
        ]);
        let fetcher = make_fetcher(transport.clone(), Arc::new(RecordingSleeper::default()));
        fetcher
            .fetch_json(&FetchRequest::get("http://x"), &policy(2), Deadline::none())
            .await
            .unwrap();
        assert_eq!(transport.calls(), 2);
    }

    struct SlowTransport;

    #[async_trait]
    impl CatalogTransport for SlowTransport {
        async fn send(
            &self,
            _request: &FetchRequest,
        ) -> std::result::Result<TransportResponse, TransientFailure> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(TransportResponse {
                status: 200,
                body: "{}".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn slow_responses_time_out_as_transient() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = Fetcher::new(
            Arc::new(SlowTransport),
            sleeper.clone(),
            Duration::from_millis(20),
        );

        let err = fetcher
            .fetch_json(&FetchRequest::get("http://x"), &policy(2), Deadline::none())
            .await
            .unwrap_err();
        match err {
            IngestError::UpstreamUnavailable { last_error, .. } => {
                assert_eq!(last_error, TransientFailure::Timeout)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sleeper.delays().len(), 1);
    }

    #[tokio::test]
    async fn expired_deadline_stops_before_the_first_request() {
        let transport = ScriptedTransport::statuses(&[200], "{}");
        let fetcher = make_fetcher(transport.clone(), Arc::new(RecordingSleeper::default()));
        let err = fetcher
            .fetch_json(
                &FetchRequest::get("http://x"),
                &policy(3),
                Deadline::after(Duration::ZERO),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DeadlineExceeded));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn backoff_longer_than_remaining_budget_is_not_slept() {
        let transport = ScriptedTransport::statuses(&[429], "{}");
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = make_fetcher(transport.clone(), sleeper.clone());
        let err = fetcher
            .fetch_json(
                &FetchRequest::get("http://x"),
                &policy(4),
                Deadline::after(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DeadlineExceeded));
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn reqwest_transport_sends_headers() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_header("x-listenapi-key", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": []}"#)
            .expect(1)
            .create_async()
            .await;

        let transport = ReqwestTransport::new("tunecast-test").unwrap();
        let request = FetchRequest::get(format!("{}/search", server.url()))
            .header("X-ListenAPI-Key", "secret");
        let response = transport.send(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"results": []}"#);
    }
}
