use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheMode, ResponseCache};
use crate::circuit_breaker::BlockGuard;
use crate::config::{CategoryConfig, ServiceConfig};
use crate::diagnostics::Diagnostics;
use crate::domain::Tile;
use crate::http_client::{HttpClient, HttpErrorKind, HttpRequest};
use crate::outcome::{ErrorKind, FetchFailure, FetchOutcome};
use crate::throttling::RateLimiter;
use crate::wire::{decode_response, RequestPayload};

/// Fetches one tile of one category.
///
/// The seam between the subdivision logic and the network. Implementations
/// must never block past their own deadline, and must not start a new
/// request once `cancel` has fired.
pub trait TileFetcher: Send + Sync {
    fn fetch_tile<'a>(
        &'a self,
        tile: &'a Tile,
        category: &'a CategoryConfig,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>>;
}

impl<T: TileFetcher + ?Sized> TileFetcher for Arc<T> {
    fn fetch_tile<'a>(
        &'a self,
        tile: &'a Tile,
        category: &'a CategoryConfig,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        (**self).fetch_tile(tile, category, cancel)
    }
}

/// HTTP client for the cadastral service.
///
/// Every attempt passes the block guard and the shared rate limiter, then runs
/// under a hard deadline of the attempt timeout plus a grace period, so a
/// transport that ignores its own timeout cannot hang a worker. Rate limits,
/// connection and TLS failures and 5xx responses are retried with backoff.
/// Timeouts are returned as [`FetchOutcome::TimedOut`] so the caller can try
/// a smaller area instead. A cancelled token ends the loop at the next wait:
/// rate limiter, backoff sleep or the response itself.
#[derive(Clone)]
pub struct RetryingHttpClient {
    transport: Arc<dyn HttpClient>,
    limiter: Arc<RateLimiter>,
    cache: ResponseCache,
    cache_mode: CacheMode,
    guard: Arc<BlockGuard>,
    diagnostics: Arc<Diagnostics>,
    service: Arc<ServiceConfig>,
}

impl RetryingHttpClient {
    pub fn new(
        transport: Arc<dyn HttpClient>,
        limiter: Arc<RateLimiter>,
        cache: ResponseCache,
        guard: Arc<BlockGuard>,
        diagnostics: Arc<Diagnostics>,
        service: Arc<ServiceConfig>,
    ) -> Self {
        Self {
            transport,
            limiter,
            cache,
            cache_mode: CacheMode::default(),
            guard,
            diagnostics,
            service,
        }
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Sends `payload` for `category`, retrying as the category allows.
    pub async fn send(&self, payload: &RequestPayload, category: &CategoryConfig) -> FetchOutcome {
        self.send_with_cancel(payload, category, &CancellationToken::new())
            .await
    }

    pub async fn send_with_cancel(
        &self,
        payload: &RequestPayload,
        category: &CategoryConfig,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let (key, body) = match payload.cache_key().and_then(|key| Ok((key, payload.to_json()?))) {
            Ok(encoded) => encoded,
            Err(error) => {
                return self.fail(
                    ErrorKind::InvalidRequest,
                    format!("failed to encode request: {error}"),
                )
            }
        };

        if self.cache_mode.reads() {
            if let Some(hit) = self.cache.get(&key).await {
                self.diagnostics.record_cache_hit();
                debug!(category = category.id, features = hit.len(), "response cache hit");
                return FetchOutcome::from_features(hit.as_ref().clone());
            }
        }

        let retry = category.retry_config(self.service.backoff());
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(category = category.id, attempt, "cancelled, not sending");
                return FetchOutcome::Cancelled;
            }

            let (kind, message) = match self.attempt(&key, &body, category, attempt, cancel).await {
                Ok(outcome) => return outcome,
                Err(retryable) => retryable,
            };

            self.diagnostics.record_failure(kind);
            if !retry.can_retry(attempt) {
                warn!(
                    category = category.id,
                    attempts = attempt + 1,
                    error = kind.code(),
                    "giving up on request: {message}"
                );
                return FetchOutcome::Failed(FetchFailure::new(
                    kind,
                    format!("gave up after {} attempts: {message}", attempt + 1),
                ));
            }

            let delay = retry.delay_for_attempt(attempt);
            self.diagnostics.record_retry();
            warn!(
                category = category.id,
                attempt = attempt + 1,
                error = kind.code(),
                delay_ms = delay.as_millis() as u64,
                "retrying request: {message}"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    debug!(category = category.id, "cancelled during backoff");
                    return FetchOutcome::Cancelled;
                }
            }
            attempt += 1;
        }
    }

    /// One network round trip. `Err` carries a retryable failure.
    async fn attempt(
        &self,
        key: &str,
        body: &str,
        category: &CategoryConfig,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, (ErrorKind, String)> {
        if !self.guard.allow_request() {
            return Ok(self.fail(
                ErrorKind::Forbidden,
                "requests suspended after repeated 403 responses",
            ));
        }

        tokio::select! {
            () = self.limiter.acquire() => {}
            () = cancel.cancelled() => {
                self.guard.abandon_probe();
                return Ok(FetchOutcome::Cancelled);
            }
        }
        self.diagnostics.record_request();

        let timeout = category.timeouts.for_attempt(attempt);
        let request = self.request(body, timeout);
        let deadline = timeout.saturating_add(self.service.deadline_grace);

        let exchange = tokio::time::timeout(deadline, self.transport.execute(request));
        let finished = tokio::select! {
            finished = exchange => finished,
            () = cancel.cancelled() => {
                debug!(category = category.id, "cancelled while waiting for the response");
                self.guard.abandon_probe();
                return Ok(FetchOutcome::Cancelled);
            }
        };

        let response = match finished {
            Err(_) => {
                warn!(
                    category = category.id,
                    deadline_ms = deadline.as_millis() as u64,
                    "request exceeded its hard deadline, abandoning it"
                );
                self.guard.abandon_probe();
                self.diagnostics.record_failure(ErrorKind::Timeout);
                return Ok(FetchOutcome::TimedOut);
            }
            Ok(Err(error)) => {
                self.guard.abandon_probe();
                let kind = match error.kind() {
                    HttpErrorKind::Timeout => {
                        debug!(category = category.id, timeout_ms = timeout.as_millis() as u64, "request timed out");
                        self.diagnostics.record_failure(ErrorKind::Timeout);
                        return Ok(FetchOutcome::TimedOut);
                    }
                    HttpErrorKind::Tls => ErrorKind::TlsFailure,
                    HttpErrorKind::Connect | HttpErrorKind::Other => ErrorKind::ConnectionFailure,
                };
                return Err((kind, error.message().to_owned()));
            }
            Ok(Ok(response)) => response,
        };

        if response.status == 403 {
            self.guard.record_forbidden();
            warn!(
                category = category.id,
                "service answered 403, the address may be blocked; not retrying"
            );
            return Ok(self.fail(ErrorKind::Forbidden, "service answered 403 Forbidden"));
        }
        self.guard.record_success();

        match response.status {
            429 => {
                return Err((ErrorKind::RateLimited, String::from("service answered 429 Too Many Requests")))
            }
            500..=599 => {
                return Err((ErrorKind::ServerError, format!("service answered {}", response.status)))
            }
            status if !response.is_success() => {
                return Ok(self.fail(ErrorKind::UnexpectedStatus, format!("service answered {status}")))
            }
            _ => {}
        }

        match decode_response(&response.body) {
            Ok(page) => {
                if page.skipped > 0 {
                    self.diagnostics.record_skipped_features(page.skipped);
                }
                if self.cache_mode.writes() {
                    self.cache.put(key.to_owned(), page.features.clone()).await;
                }
                Ok(FetchOutcome::from_features(page.features))
            }
            Err(malformed) => Ok(self.fail(
                ErrorKind::MalformedResponse,
                format!("response is not a feature document: {}", malformed.0),
            )),
        }
    }

    fn request(&self, body: &str, timeout: std::time::Duration) -> HttpRequest {
        let mut request = HttpRequest::post(&self.service.endpoint_url)
            .with_header("accept", "*/*")
            .with_header("content-type", "application/json")
            .with_header("user-agent", &self.service.user_agent)
            .with_body(body)
            .with_timeout(timeout);
        if let Some(referer) = &self.service.referer {
            request = request.with_header("referer", referer);
        }
        if let Some(origin) = self.service.origin() {
            request = request.with_header("origin", origin);
        }
        request
    }

    fn fail(&self, kind: ErrorKind, message: impl Into<String>) -> FetchOutcome {
        self.diagnostics.record_failure(kind);
        FetchOutcome::failed(kind, message)
    }
}

impl TileFetcher for RetryingHttpClient {
    fn fetch_tile<'a>(
        &'a self,
        tile: &'a Tile,
        category: &'a CategoryConfig,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
        Box::pin(async move {
            let payload = RequestPayload::for_tile(category.id, tile);
            self.send_with_cancel(&payload, category, cancel).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::circuit_breaker::BlockGuardConfig;
    use crate::config::TimeoutSchedule;
    use crate::domain::{Geometry, Position};
    use crate::http_client::{HttpError, HttpResponse};

    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().expect("lock").len()
        }
    }

    impl HttpClient for Scripted {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.seen.lock().expect("lock").push(request);
            let reply = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::ok_json("{}")));
            Box::pin(async move { reply })
        }
    }

    fn client(transport: Arc<Scripted>) -> RetryingHttpClient {
        let service = ServiceConfig::new("https://cadastre.example/api")
            .with_referer("https://cadastre.example/map");
        RetryingHttpClient::new(
            transport,
            Arc::new(RateLimiter::new(10).expect("limiter")),
            ResponseCache::with_default_ttl(),
            Arc::new(BlockGuard::new(BlockGuardConfig::default())),
            Arc::new(Diagnostics::new()),
            Arc::new(service),
        )
    }

    fn payload() -> RequestPayload {
        RequestPayload::new(36368, Geometry::Point(Position::new(37.6, 55.7)))
    }

    fn one_feature() -> String {
        r#"{"features":[{"type":"Feature","geometry":{"type":"Point","coordinates":[1,2]},"properties":{"interactionId":"a"}}]}"#.to_owned()
    }

    #[tokio::test(start_paused = true)]
    async fn sends_contract_headers() {
        let transport = Scripted::new(vec![Ok(HttpResponse::ok_json(one_feature()))]);
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels");

        let outcome = client.send(&payload(), &category).await;
        assert_eq!(outcome.feature_count(), 1);

        let seen = transport.seen.lock().expect("lock");
        let request = &seen[0];
        assert_eq!(request.headers.get("origin").map(String::as_str), Some("https://cadastre.example"));
        assert_eq!(request.headers.get("content-type").map(String::as_str), Some("application/json"));
        assert_eq!(request.timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_is_not_retried() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(403, ""))]);
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels");

        let outcome = client.send(&payload(), &category).await;
        assert!(matches!(outcome, FetchOutcome::Failed(ref failure) if failure.kind == ErrorKind::Forbidden));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_timeout_becomes_timed_out_without_retry() {
        let transport = Scripted::new(vec![Err(HttpError::timeout("read timed out"))]);
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels");

        assert_eq!(client.send(&payload(), &category).await, FetchOutcome::TimedOut);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tls_failures_exhaust_the_retry_budget() {
        let transport = Scripted::new(vec![
            Err(HttpError::tls("bad certificate")),
            Err(HttpError::tls("bad certificate")),
        ]);
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels").with_max_retries(1);

        let outcome = client.send(&payload(), &category).await;
        assert!(matches!(outcome, FetchOutcome::Failed(ref failure) if failure.kind == ErrorKind::TlsFailure));
        assert_eq!(transport.calls(), 2);
        assert_eq!(client.diagnostics().snapshot().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn progressive_timeouts_follow_the_attempt_number() {
        let transport = Scripted::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::ok_json("{}")),
        ]);
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels")
            .with_timeouts(TimeoutSchedule::parse("3;10;30").expect("schedule"));

        assert_eq!(client.send(&payload(), &category).await, FetchOutcome::Empty);

        let timeouts: Vec<_> = transport
            .seen
            .lock()
            .expect("lock")
            .iter()
            .map(|request| request.timeout.as_secs())
            .collect();
        assert_eq!(timeouts, [3, 10, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_payload_is_served_from_cache() {
        let transport = Scripted::new(vec![Ok(HttpResponse::ok_json(one_feature()))]);
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels");

        client.send(&payload(), &category).await;
        let second = client.send(&payload(), &category).await;

        assert_eq!(second.feature_count(), 1);
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.diagnostics().snapshot().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bypass_mode_always_hits_the_network() {
        let transport = Scripted::new(vec![
            Ok(HttpResponse::ok_json(one_feature())),
            Ok(HttpResponse::ok_json(one_feature())),
        ]);
        let client = client(Arc::clone(&transport)).with_cache_mode(CacheMode::Bypass);
        let category = CategoryConfig::new(36368, "parcels");

        client.send(&payload(), &category).await;
        client.send(&payload(), &category).await;

        assert_eq!(transport.calls(), 2);
        assert!(client.cache().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_status_is_unexpected() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(400, "bad geometry"))]);
        let client = client(transport);
        let category = CategoryConfig::new(36368, "parcels");

        let outcome = client.send(&payload(), &category).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Failed(ref failure) if failure.kind == ErrorKind::UnexpectedStatus
        ));
    }

    /// Accepts the request and never answers, ignoring its own timeout.
    #[derive(Default)]
    struct Silent {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl HttpClient for Silent {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_transport_is_cut_at_the_hard_deadline() {
        let transport = Arc::new(Silent::default());
        let service = ServiceConfig::new("https://cadastre.example/api");
        let grace = service.deadline_grace;
        let client = RetryingHttpClient::new(
            Arc::clone(&transport) as Arc<dyn HttpClient>,
            Arc::new(RateLimiter::new(10).expect("limiter")),
            ResponseCache::with_default_ttl(),
            Arc::new(BlockGuard::default()),
            Arc::new(Diagnostics::new()),
            Arc::new(service),
        );
        let category = CategoryConfig::new(36368, "parcels")
            .with_timeouts(TimeoutSchedule::single(Duration::from_secs(10)));
        let started = tokio::time::Instant::now();

        let outcome = client.send(&payload(), &category).await;

        assert_eq!(outcome, FetchOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_secs(10) + grace);
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(client.diagnostics().snapshot().failures_of(ErrorKind::Timeout), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_sends_nothing() {
        let transport = Scripted::new(vec![Ok(HttpResponse::ok_json(one_feature()))]);
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = client.send_with_cancel(&payload(), &category, &cancel).await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_during_backoff_stops_the_retries() {
        let transport = Scripted::new(
            (0..10).map(|_| Ok(HttpResponse::new(429, ""))).collect(),
        );
        let client = client(Arc::clone(&transport));
        let category = CategoryConfig::new(36368, "parcels").with_max_retries(9);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let outcome = client.send_with_cancel(&payload(), &category, &cancel).await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.diagnostics().snapshot().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_while_waiting_for_the_response_returns_at_once() {
        let transport = Arc::new(Silent::default());
        let client = RetryingHttpClient::new(
            Arc::clone(&transport) as Arc<dyn HttpClient>,
            Arc::new(RateLimiter::new(10).expect("limiter")),
            ResponseCache::with_default_ttl(),
            Arc::new(BlockGuard::default()),
            Arc::new(Diagnostics::new()),
            Arc::new(ServiceConfig::new("https://cadastre.example/api")),
        );
        let category = CategoryConfig::new(36368, "parcels");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();

        let outcome = client.send_with_cancel(&payload(), &category, &cancel).await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
