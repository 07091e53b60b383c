//! Server-driven rate limiting: category lockouts and the header grammar
//! that sets them.

mod category;
mod headers;
mod limiter;
mod table;

pub use category::Category;
pub use headers::{
    parse_rate_limits, parse_retry_after, RateLimitGroup, RateLimitHeaders,
    DEFAULT_RETRY_AFTER_SECS, MAX_RETRY_AFTER_SECS, RATE_LIMITS_HEADER, RETRY_AFTER_HEADER,
};
pub use limiter::RateLimiter;
pub use table::RateLimitTable;
