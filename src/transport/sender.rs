//! The transport façade: one send, end to end.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument, trace, warn};

use super::http::{HttpClient, ReqwestClient};
use super::outcome::{FailureCause, SendOutcome};
use super::request::{SendRequest, DEFAULT_TIMEOUT};
use crate::clock::{Clock, SystemClock};
use crate::config::BeaconConfig;
use crate::delivery::DeliveryQueue;
use crate::dsn::Dsn;
use crate::error::{BeaconError, Result};
use crate::event::Event;
use crate::ratelimit::{Category, RateLimiter};

/// Header carrying the DSN-derived credentials.
pub const AUTH_HEADER: &str = "X-Sentry-Auth";

/// Ships payloads to the collector.
///
/// Consults the [`RateLimiter`] before every send, runs the network call
/// through the [`DeliveryQueue`], and feeds response headers back into the
/// limiter. The transport owns neither store; clones share both.
pub struct Transport<C: HttpClient + 'static = ReqwestClient> {
    client: Arc<C>,
    limiter: Arc<RateLimiter>,
    queue: DeliveryQueue,
    clock: Arc<dyn Clock>,
    /// Added to every request; per-request headers win on conflict
    headers: BTreeMap<String, String>,
    endpoint: Option<String>,
    timeout: Duration,
}

impl<C: HttpClient + 'static> Clone for Transport<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            limiter: Arc::clone(&self.limiter),
            queue: self.queue.clone(),
            clock: Arc::clone(&self.clock),
            headers: self.headers.clone(),
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
        }
    }
}

impl Transport<ReqwestClient> {
    /// Build a transport from configuration.
    ///
    /// Requires a DSN; the store endpoint and auth header are derived from it.
    pub fn from_config(config: &BeaconConfig) -> Result<Self> {
        config.validate()?;

        let dsn = config
            .transport
            .dsn
            .as_deref()
            .ok_or_else(|| BeaconError::Config("transport.dsn is required".to_string()))
            .and_then(Dsn::parse)?;

        let client = ReqwestClient::new()?;
        let queue = DeliveryQueue::new(config.delivery.queue_capacity);

        let mut headers = BTreeMap::new();
        headers.insert(AUTH_HEADER.to_string(), dsn.auth_header());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.extend(config.transport.headers.clone());

        debug!(
            endpoint = %dsn.store_url(),
            queue_capacity = queue.capacity(),
            timeout_ms = config.transport.timeout_ms,
            "Transport configured"
        );

        Ok(Transport::new(client, Arc::new(RateLimiter::new()), queue, Arc::new(SystemClock))
            .with_headers(headers)
            .with_endpoint(dsn.store_url(), config.transport.timeout()))
    }
}

impl<C: HttpClient + 'static> Transport<C> {
    /// Create a transport from its collaborators.
    pub fn new(
        client: C,
        limiter: Arc<RateLimiter>,
        queue: DeliveryQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client: Arc::new(client),
            limiter,
            queue,
            clock,
            headers: BTreeMap::new(),
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Headers added to every request.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Default destination and timeout for [`request`](Self::request).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>, timeout: Duration) -> Self {
        self.endpoint = Some(endpoint.into());
        self.timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Whether `category` is locked out right now. Lets callers skip building
    /// a payload that would be rejected anyway.
    pub fn is_limited(&self, category: &Category) -> bool {
        self.limiter.is_limited(category, self.clock.now())
    }

    /// A request to the configured endpoint with the configured timeout.
    pub fn request(&self, category: Category, body: impl Into<Vec<u8>>) -> Result<SendRequest> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| BeaconError::Config("transport has no endpoint".to_string()))?;

        Ok(SendRequest::new(category, endpoint, body).with_timeout(self.timeout))
    }

    /// Send one payload and report how it went.
    ///
    /// Never retries and never fails: every call resolves to exactly one
    /// [`SendOutcome`]. A locked-out category short-circuits without touching
    /// the queue or the network.
    #[instrument(
        skip(self, request),
        fields(category = %request.category(), url = %request.url())
    )]
    pub async fn send(&self, request: SendRequest) -> SendOutcome {
        let now = self.clock.now();
        if let Some(retry_at) = self.limiter.limited_until(request.category(), now) {
            debug!(retry_at = %retry_at, "Category locked out, not sending");
            return SendOutcome::RateLimited {
                category: request.category().clone(),
                retry_at,
            };
        }

        let headers = self.merged_headers(&request);
        let task = deliver(
            Arc::clone(&self.client),
            Arc::clone(&self.limiter),
            Arc::clone(&self.clock),
            headers,
            request,
        );

        match self.queue.submit(task) {
            Ok(submission) => match submission.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Delivery task failed");
                    SendOutcome::network_failure(FailureCause::Aborted(e.to_string()))
                }
            },
            // Admission only ever fails for lack of a slot.
            Err(_full) => SendOutcome::network_failure(FailureCause::QueueFull),
        }
    }

    /// Serialize `event` and send it as an `error` payload to the configured
    /// endpoint.
    pub async fn send_event(&self, event: &Event) -> Result<SendOutcome> {
        let request = self.request(Category::ERROR, event.to_body()?)?;
        Ok(self.send(request).await)
    }

    /// Wait for in-flight sends to settle, for at most `timeout`.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.queue.drain(timeout).await
    }

    fn merged_headers(&self, request: &SendRequest) -> BTreeMap<String, String> {
        let mut headers = self.headers.clone();
        headers.extend(
            request
                .headers()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        headers
    }
}

/// The network half of a send. Runs inside a delivery slot.
async fn deliver<C: HttpClient>(
    client: Arc<C>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    headers: BTreeMap<String, String>,
    request: SendRequest,
) -> SendOutcome {
    let timeout = request.timeout();
    let attempt = client.post(request.url(), &headers, request.body(), timeout);

    let response = match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(response)) => response,
        Ok(Err(cause)) => {
            error!(cause = %cause, "Transport error");
            return SendOutcome::network_failure(cause);
        }
        Err(_elapsed) => {
            error!(timeout_ms = timeout.as_millis() as u64, "Transport error: request timed out");
            return SendOutcome::network_failure(FailureCause::Timeout);
        }
    };

    let now = clock.now();
    let category = request.category();
    let limited = limiter.apply_headers(&response.rate_limit_headers(), now);

    match response.status {
        200..=299 => {
            trace!(status = response.status, "Payload accepted");
            SendOutcome::Success
        }
        429 => {
            if !limited {
                limiter.apply_default_lockout(Category::ALL, now);
            }
            let retry_at = match limiter.limited_until(category, now) {
                Some(until) => until,
                None => limiter.apply_default_lockout(category.clone(), now),
            };
            SendOutcome::RateLimited {
                category: category.clone(),
                retry_at,
            }
        }
        status_code => {
            warn!(status = status_code, "Payload rejected by server");
            SendOutcome::ServerRejected { status_code }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::MAX_RETRY_AFTER_SECS;
    use crate::transport::http::HttpResponse;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with a fixed response and records what it was asked to post.
    #[derive(Debug)]
    struct ScriptedClient {
        reply: std::result::Result<HttpResponse, FailureCause>,
        calls: AtomicUsize,
        last_headers: Mutex<BTreeMap<String, String>>,
    }

    impl ScriptedClient {
        fn replying(reply: std::result::Result<HttpResponse, FailureCause>) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
                last_headers: Mutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn post(
            &self,
            _url: &str,
            headers: &BTreeMap<String, String>,
            _body: &[u8],
            _timeout: Duration,
        ) -> std::result::Result<HttpResponse, FailureCause> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_headers.lock() = headers.clone();
            self.reply.clone()
        }
    }

    /// Never answers.
    struct HangingClient;

    #[async_trait]
    impl HttpClient for HangingClient {
        async fn post(
            &self,
            _url: &str,
            _headers: &BTreeMap<String, String>,
            _body: &[u8],
            _timeout: Duration,
        ) -> std::result::Result<HttpResponse, FailureCause> {
            std::future::pending().await
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn transport<C: HttpClient>(client: C, clock: &ManualClock) -> Transport<C> {
        Transport::new(
            client,
            Arc::new(RateLimiter::new()),
            DeliveryQueue::new(2),
            Arc::new(clock.clone()),
        )
    }

    fn error_request() -> SendRequest {
        SendRequest::new(Category::ERROR, "http://collector.test/api/1/store/", "{}")
    }

    #[tokio::test]
    async fn test_success() {
        let clock = ManualClock::at_secs(1000);
        let transport = transport(ScriptedClient::replying(Ok(HttpResponse::new(200))), &clock);

        assert_eq!(transport.send(error_request()).await, SendOutcome::Success);
        assert_eq!(transport.queue().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_server_rejected() {
        let clock = ManualClock::at_secs(1000);
        let transport = transport(ScriptedClient::replying(Ok(HttpResponse::new(400))), &clock);

        assert_eq!(
            transport.send(error_request()).await,
            SendOutcome::ServerRejected { status_code: 400 }
        );
        assert!(transport.limiter().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_response_still_applies_headers() {
        let clock = ManualClock::at_secs(1000);
        let reply = HttpResponse::new(503).with_header("Retry-After", "30");
        let transport = transport(ScriptedClient::replying(Ok(reply)), &clock);

        assert_eq!(
            transport.send(error_request()).await,
            SendOutcome::ServerRejected { status_code: 503 }
        );
        assert!(transport.is_limited(&Category::SESSION));
    }

    #[tokio::test]
    async fn test_429_records_limit_and_reports_retry_at() {
        let clock = ManualClock::at_secs(1000);
        let reply = HttpResponse::new(429).with_header("X-Sentry-Rate-Limits", "60:error;transaction");
        let transport = transport(ScriptedClient::replying(Ok(reply)), &clock);

        let outcome = transport.send(error_request()).await;

        let recorded = transport.limiter().snapshot().expiry(&Category::ERROR);
        assert_eq!(recorded, Some(at(1060)));
        assert_eq!(outcome.retry_at(), recorded);
    }

    #[tokio::test]
    async fn test_bare_429_locks_everything_for_default_delay() {
        let clock = ManualClock::at_secs(1000);
        let transport = transport(ScriptedClient::replying(Ok(HttpResponse::new(429))), &clock);

        let outcome = transport.send(error_request()).await;

        assert_eq!(outcome.retry_at(), Some(at(1060)));
        assert_eq!(transport.limiter().snapshot().expiry(&Category::ALL), Some(at(1060)));
    }

    #[tokio::test]
    async fn test_429_for_other_category_locks_this_one() {
        let clock = ManualClock::at_secs(1000);
        let reply = HttpResponse::new(429).with_header("X-Sentry-Rate-Limits", "10:session");
        let transport = transport(ScriptedClient::replying(Ok(reply)), &clock);

        let outcome = transport.send(error_request()).await;

        assert_eq!(outcome.retry_at(), Some(at(1060)));
        assert_eq!(transport.limiter().snapshot().expiry(&Category::SESSION), Some(at(1010)));
        assert!(transport.limiter().snapshot().expiry(&Category::ALL).is_none());
    }

    #[tokio::test]
    async fn test_429_with_huge_delay_is_clamped() {
        let clock = ManualClock::at_secs(1000);
        let reply =
            HttpResponse::new(429).with_header("X-Sentry-Rate-Limits", "99999999999999999:error");
        let transport = transport(ScriptedClient::replying(Ok(reply)), &clock);

        let outcome = transport.send(error_request()).await;

        let until = at(1000) + chrono::Duration::seconds(MAX_RETRY_AFTER_SECS);
        assert_eq!(
            outcome,
            SendOutcome::RateLimited {
                category: Category::ERROR,
                retry_at: until,
            }
        );
        assert_eq!(transport.limiter().snapshot().expiry(&Category::ERROR), Some(until));

        clock.set(at(1_000_000));
        assert!(matches!(
            transport.send(error_request()).await,
            SendOutcome::RateLimited { .. }
        ));
        assert_eq!(transport.client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_locked_out_category_never_reaches_network() {
        let clock = ManualClock::at_secs(1000);
        let reply = HttpResponse::new(429).with_header("X-Sentry-Rate-Limits", "60:error");
        let transport = transport(ScriptedClient::replying(Ok(reply)), &clock);

        transport.send(error_request()).await;
        assert_eq!(transport.client.calls.load(Ordering::SeqCst), 1);

        clock.set(at(1059));
        let outcome = transport.send(error_request()).await;
        assert_eq!(
            outcome,
            SendOutcome::RateLimited {
                category: Category::ERROR,
                retry_at: at(1060),
            }
        );
        assert_eq!(transport.client.calls.load(Ordering::SeqCst), 1);

        clock.set(at(1060));
        transport.send(error_request()).await;
        assert_eq!(transport.client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_failure_skips_header_parsing() {
        let clock = ManualClock::at_secs(1000);
        let cause = FailureCause::Connection("connection refused".to_string());
        let transport = transport(ScriptedClient::replying(Err(cause.clone())), &clock);

        assert_eq!(
            transport.send(error_request()).await,
            SendOutcome::NetworkFailure { cause }
        );
        assert!(transport.limiter().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let clock = ManualClock::at_secs(1000);
        let transport = transport(HangingClient, &clock);
        let request = error_request().with_timeout(Duration::from_millis(20));

        let outcome = transport.send(request.clone()).await;
        assert_eq!(
            outcome,
            SendOutcome::NetworkFailure {
                cause: FailureCause::Timeout
            }
        );
        assert_eq!(transport.queue().outstanding(), 0);

        // Both slots are available again.
        let (a, b) = tokio::join!(transport.send(request.clone()), transport.send(request));
        assert!(!a.is_dropped());
        assert!(!b.is_dropped());
    }

    #[tokio::test]
    async fn test_request_headers_override_transport_headers() {
        let clock = ManualClock::at_secs(1000);
        let mut defaults = BTreeMap::new();
        defaults.insert(AUTH_HEADER.to_string(), "Sentry sentry_key=abc".to_string());
        defaults.insert("X-Mode".to_string(), "default".to_string());
        let transport = transport(ScriptedClient::replying(Ok(HttpResponse::new(200))), &clock)
            .with_headers(defaults);

        transport
            .send(error_request().with_header("X-Mode", "override"))
            .await;

        let seen = transport.client.last_headers.lock().clone();
        assert_eq!(seen[AUTH_HEADER], "Sentry sentry_key=abc");
        assert_eq!(seen["X-Mode"], "override");
    }

    #[tokio::test]
    async fn test_request_requires_endpoint() {
        let clock = ManualClock::at_secs(1000);
        let transport = transport(ScriptedClient::replying(Ok(HttpResponse::new(200))), &clock);
        assert!(transport.request(Category::ERROR, "{}").is_err());

        let transport = transport.with_endpoint("http://collector.test/api/1/store/", Duration::from_millis(300));
        let request = transport.request(Category::SESSION, "{}").unwrap();
        assert_eq!(request.url(), "http://collector.test/api/1/store/");
        assert_eq!(request.timeout(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_send_event() {
        let clock = ManualClock::at_secs(1000);
        let transport = transport(ScriptedClient::replying(Ok(HttpResponse::new(200))), &clock)
            .with_endpoint("http://collector.test/api/1/store/", DEFAULT_TIMEOUT);

        let event = Event::message("hello", crate::event::Level::Info);
        assert_eq!(transport.send_event(&event).await.unwrap(), SendOutcome::Success);
    }

    #[test]
    fn test_from_config_requires_dsn() {
        let config = BeaconConfig::default();
        assert!(matches!(Transport::from_config(&config), Err(BeaconError::Config(_))));

        let mut config = BeaconConfig::default();
        config.transport.dsn = Some("https://key@collector.test/5".to_string());
        let transport = Transport::from_config(&config).unwrap();
        assert_eq!(transport.endpoint(), Some("https://collector.test/api/5/store/"));
        assert!(transport.headers[AUTH_HEADER].ends_with("sentry_key=key"));
    }
}
