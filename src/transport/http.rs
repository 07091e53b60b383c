//! The network primitive the transport posts through.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::{debug, trace};

use super::outcome::FailureCause;
use crate::error::Result;
use crate::ratelimit::RateLimitHeaders;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Status line and headers of a collector response. The body is not kept.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
}

impl HttpResponse {
    /// A response with the given status and no headers.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// Add a header. Names or values that are not valid HTTP are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => debug!(header = %name, "Ignoring invalid response header"),
        }
        self
    }

    /// The rate-limit signals carried by this response.
    pub fn rate_limit_headers(&self) -> RateLimitHeaders {
        RateLimitHeaders::from_header_map(&self.headers)
    }
}

/// Port for the HTTP POST the transport performs.
///
/// Implementations report anything short of a complete status line and
/// header block as a [`FailureCause`]. The transport enforces `timeout` on
/// top of whatever the implementation does.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, FailureCause>;
}

/// [`HttpClient`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Build a client with Beacon's connection settings.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .tcp_nodelay(true)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(10)
            .connect_timeout(CONNECTION_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, FailureCause> {
        let mut request = self.client.post(url).timeout(timeout).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        // Drain the body so the connection can go back to the pool.
        if let Err(e) = response.bytes().await {
            trace!(error = %e, "Discarding unreadable response body");
        }

        Ok(HttpResponse { status, headers })
    }
}

fn classify(err: reqwest::Error) -> FailureCause {
    if err.is_timeout() {
        FailureCause::Timeout
    } else if err.is_decode() || err.is_body() {
        FailureCause::MalformedResponse(err.to_string())
    } else {
        FailureCause::Connection(err.to_string())
    }
}
