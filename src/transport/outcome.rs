//! Typed results of a send attempt.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::ratelimit::Category;

/// Why a send never got a response from the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The request did not settle within its timeout.
    Timeout,
    /// Every delivery slot was taken; the payload was dropped.
    QueueFull,
    /// Connection refused, reset, DNS failure and the like.
    Connection(String),
    /// A response arrived but could not be read.
    MalformedResponse(String),
    /// The delivery task died before settling.
    Aborted(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Timeout => f.write_str("timeout"),
            FailureCause::QueueFull => f.write_str("queue_full"),
            FailureCause::Connection(detail) => write!(f, "connection: {detail}"),
            FailureCause::MalformedResponse(detail) => write!(f, "malformed_response: {detail}"),
            FailureCause::Aborted(detail) => write!(f, "aborted: {detail}"),
        }
    }
}

/// Terminal result of one send. Exactly one per `Transport::send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector accepted the payload (2xx).
    Success,
    /// The category is locked out, locally or per a 429. Retry after `retry_at`.
    RateLimited {
        category: Category,
        retry_at: DateTime<Utc>,
    },
    /// The collector answered with a non-2xx, non-429 status.
    ServerRejected { status_code: u16 },
    /// No usable response was received.
    NetworkFailure { cause: FailureCause },
}

impl SendOutcome {
    /// Whether the payload was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }

    /// When the caller may retry, for rate-limited outcomes.
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SendOutcome::RateLimited { retry_at, .. } => Some(*retry_at),
            _ => None,
        }
    }

    /// Whether the payload was dropped locally without touching the network.
    pub fn is_dropped(&self) -> bool {
        matches!(
            self,
            SendOutcome::NetworkFailure {
                cause: FailureCause::QueueFull
            }
        )
    }

    pub(crate) fn network_failure(cause: FailureCause) -> Self {
        SendOutcome::NetworkFailure { cause }
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendOutcome::Success => f.write_str("success"),
            SendOutcome::RateLimited { category, retry_at } => {
                write!(f, "rate limited ({category}) until {}", retry_at.to_rfc3339())
            }
            SendOutcome::ServerRejected { status_code } => {
                write!(f, "rejected by server with status {status_code}")
            }
            SendOutcome::NetworkFailure { cause } => write!(f, "network failure: {cause}"),
        }
    }
}
