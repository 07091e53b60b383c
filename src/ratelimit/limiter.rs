//! Server-driven rate limiter.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::category::Category;
use super::headers::{RateLimitHeaders, DEFAULT_RETRY_AFTER_SECS};
use super::table::RateLimitTable;

/// Tracks category lockouts reported by the collector and answers admission
/// queries against them.
///
/// This struct is thread-safe and can be shared across multiple tasks. The
/// table is only ever mutated through [`apply_headers`](Self::apply_headers),
/// [`apply_default_lockout`](Self::apply_default_lockout) and
/// [`purge_expired`](Self::purge_expired); each runs under a single write
/// lock, so concurrent admission checks never observe a half-applied header.
#[derive(Debug, Default)]
pub struct RateLimiter {
    table: RwLock<RateLimitTable>,
}

impl RateLimiter {
    /// Create a rate limiter with no lockouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `category` (or `all`) is locked out at `now`.
    pub fn is_limited(&self, category: &Category, now: DateTime<Utc>) -> bool {
        self.table.read().is_limited(category, now)
    }

    /// When `category` may be sent again, if it is locked out at `now`.
    pub fn limited_until(&self, category: &Category, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.table.read().limited_until(category, now)
    }

    /// Record the lockouts signalled by a response.
    ///
    /// The structured rate-limit header takes priority over `Retry-After`.
    /// Every category it names gets `now + delay`, overwriting whatever was
    /// recorded before. Returns whether any lockout was recorded.
    pub fn apply_headers(&self, headers: &RateLimitHeaders, now: DateTime<Utc>) -> bool {
        let groups = headers.groups(now);
        if groups.is_empty() {
            return false;
        }

        let mut table = self.table.write();
        for group in groups {
            let until = expiry_after(now, group.delay);
            for category in group.categories {
                warn!(
                    category = %category,
                    until = %until,
                    "Too many requests, backing off"
                );
                table.set(category, until);
            }
        }
        true
    }

    /// Lock out `category` for the default delay and return the expiry.
    ///
    /// Used when the collector answers 429 without a signal covering the
    /// category that was sent.
    pub fn apply_default_lockout(&self, category: Category, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = expiry_after(now, Duration::seconds(DEFAULT_RETRY_AFTER_SECS));
        warn!(
            category = %category,
            until = %until,
            "Too many requests without a usable rate limit header, backing off"
        );
        self.table.write().set(category, until);
        until
    }

    /// Forget lockouts that have lapsed. Never changes `is_limited` answers.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let removed = self.table.write().purge_expired(now);
        if removed > 0 {
            debug!(removed = removed, "Purged expired lockouts");
        }
        removed
    }

    /// A copy of the current table.
    pub fn snapshot(&self) -> RateLimitTable {
        self.table.read().clone()
    }
}

/// `now + delay`, saturating at the latest representable instant.
fn expiry_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
