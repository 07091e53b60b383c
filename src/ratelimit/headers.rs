//! Rate-limit signals carried on collector responses.
//!
//! Two headers are recognized:
//!
//! - `X-Sentry-Rate-Limits`: `group ("," group)*` where
//!   `group := seconds ":" categories` and `categories := category (";" category)*`.
//!   An empty or missing category list means `all`. Fields after a second
//!   colon (scope, reason) are ignored.
//! - `Retry-After`: an integer count of seconds or an HTTP date. Applies to
//!   `all`.
//!
//! The structured header wins whenever it yields at least one usable group.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::header::HeaderMap;
use tracing::debug;

use super::category::Category;

/// Header carrying per-category lockouts.
pub const RATE_LIMITS_HEADER: &str = "x-sentry-rate-limits";
/// Standard HTTP retry header.
pub const RETRY_AFTER_HEADER: &str = "retry-after";
/// Delay applied when a group's seconds field is unusable.
pub const DEFAULT_RETRY_AFTER_SECS: i64 = 60;
/// Longest lockout a single header can impose; larger delays are clamped.
pub const MAX_RETRY_AFTER_SECS: i64 = 365 * 24 * 60 * 60;

/// The two recognized header values, extracted at the HTTP boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Raw `X-Sentry-Rate-Limits` value
    pub rate_limits: Option<String>,
    /// Raw `Retry-After` value
    pub retry_after: Option<String>,
}

/// One parsed lockout instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitGroup {
    /// How long the categories stay locked, counted from the response time
    pub delay: Duration,
    /// Affected categories; `[Category::ALL]` when the header named none
    pub categories: Vec<Category>,
}

impl RateLimitHeaders {
    /// Build from explicit values.
    pub fn new(rate_limits: Option<&str>, retry_after: Option<&str>) -> Self {
        Self {
            rate_limits: rate_limits.map(str::to_owned),
            retry_after: retry_after.map(str::to_owned),
        }
    }

    /// Extract the recognized headers from a response header map.
    ///
    /// Values that are not visible ASCII are treated as absent. Repeated
    /// rate-limit headers are joined into one group list.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let rate_limits: Vec<&str> = headers
            .get_all(RATE_LIMITS_HEADER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();

        Self {
            rate_limits: (!rate_limits.is_empty()).then(|| rate_limits.join(",")),
            retry_after: headers
                .get(RETRY_AFTER_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        }
    }

    /// Extract the recognized headers from arbitrary name/value pairs, matching
    /// names case-insensitively.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let name = name.as_ref();
            if name.eq_ignore_ascii_case(RATE_LIMITS_HEADER) {
                headers.rate_limits = Some(value.as_ref().to_owned());
            } else if name.eq_ignore_ascii_case(RETRY_AFTER_HEADER) {
                headers.retry_after = Some(value.as_ref().to_owned());
            }
        }
        headers
    }

    /// Whether neither header is present.
    pub fn is_empty(&self) -> bool {
        self.rate_limits.is_none() && self.retry_after.is_none()
    }

    /// Resolve the headers into lockout groups, honoring priority.
    ///
    /// `now` is only needed to turn an HTTP-date `Retry-After` into a delay.
    pub fn groups(&self, now: DateTime<Utc>) -> Vec<RateLimitGroup> {
        if let Some(value) = &self.rate_limits {
            let groups = parse_rate_limits(value);
            if !groups.is_empty() {
                return groups;
            }
            debug!(header = %value, "Ignoring unusable rate limit header");
        }

        self.retry_after
            .as_deref()
            .and_then(|value| parse_retry_after(value, now))
            .map(|delay| {
                vec![RateLimitGroup {
                    delay,
                    categories: vec![Category::ALL],
                }]
            })
            .unwrap_or_default()
    }
}

/// Parse a structured rate-limit header value.
///
/// Malformed groups are skipped individually. A group is malformed when it is
/// blank, or when it has neither a colon nor a numeric delay.
pub fn parse_rate_limits(value: &str) -> Vec<RateLimitGroup> {
    value
        .split(',')
        .filter_map(|raw| {
            let group = parse_group(raw);
            if group.is_none() && !raw.trim().is_empty() {
                debug!(group = %raw.trim(), "Skipping malformed rate limit group");
            }
            group
        })
        .collect()
}

fn parse_group(raw: &str) -> Option<RateLimitGroup> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut fields = raw.split(':');
    let seconds = fields.next().unwrap_or_default().trim();
    let categories = fields.next();
    let parsed_seconds = parse_seconds(seconds);

    if categories.is_none() && parsed_seconds.is_none() {
        return None;
    }

    let delay = parsed_seconds
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

    let mut categories: Vec<Category> = categories
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| Category::from(name.to_owned()))
        .collect();
    if categories.is_empty() {
        categories.push(Category::ALL);
    }

    Some(RateLimitGroup {
        delay: bounded_delay(delay),
        categories,
    })
}

/// A delay of `secs`, clamped to `0..=MAX_RETRY_AFTER_SECS`.
fn bounded_delay(secs: i64) -> Duration {
    Duration::seconds(secs.clamp(0, MAX_RETRY_AFTER_SECS))
}

/// Integer seconds. A fractional part is truncated and out-of-range values
/// saturate.
fn parse_seconds(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite())
                .map(|secs| secs.trunc() as i64)
        })
}

/// Parse a `Retry-After` value into a delay from `now`.
///
/// Accepts a non-negative integer second count or an HTTP date in any of the
/// three RFC 7231 formats. A date in the past yields a zero delay. Either form
/// is capped at [`MAX_RETRY_AFTER_SECS`]. Anything else is treated as absent.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let secs = value.parse::<i64>().unwrap_or(i64::MAX);
        return Some(bounded_delay(secs));
    }

    let max = bounded_delay(MAX_RETRY_AFTER_SECS);
    parse_http_date(value).map(|at| (at - now).clamp(Duration::zero(), max))
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    // IMF-fixdate, e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    // RFC 850, e.g. "Sunday, 06-Nov-94 08:49:37 GMT", then asctime, e.g.
    // "Sun Nov  6 08:49:37 1994"
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
