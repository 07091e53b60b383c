//! Outbound send requests.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::ratelimit::Category;

/// Default per-request network timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// One telemetry payload ready to be posted.
///
/// Immutable once built; the `with_*` methods consume and return a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    category: Category,
    url: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    timeout: Duration,
}

impl SendRequest {
    /// Create a request with no headers and the default timeout.
    pub fn new(category: Category, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            category,
            url: url.into(),
            headers: BTreeMap::new(),
            body: body.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Add a header, replacing any previous value for the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
