//! Category lockout table.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::category::Category;

/// Mapping from category to the instant its lockout expires.
///
/// A category that is absent, or whose expiry is at or before `now`, is not
/// limited. An unexpired `all` entry limits every category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitTable {
    expiries: HashMap<Category, DateTime<Utc>>,
}

impl RateLimitTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lockout for `category` until `until`, replacing any previous
    /// expiry.
    pub fn set(&mut self, category: Category, until: DateTime<Utc>) {
        self.expiries.insert(category, until);
    }

    /// The recorded expiry for exactly `category`, expired or not.
    pub fn expiry(&self, category: &Category) -> Option<DateTime<Utc>> {
        self.expiries.get(category).copied()
    }

    /// Whether `category` is locked out at `now`.
    pub fn is_limited(&self, category: &Category, now: DateTime<Utc>) -> bool {
        self.limited_until(category, now).is_some()
    }

    /// The instant at which `category` becomes sendable again, if it is
    /// locked out at `now`.
    ///
    /// When both the category entry and the wildcard are active, the later of
    /// the two wins.
    pub fn limited_until(&self, category: &Category, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let own = self.expiry(category).filter(|until| *until > now);
        let all = self.expiry(&Category::ALL).filter(|until| *until > now);
        own.max(all)
    }

    /// Drop entries that expired at or before `now`. Returns how many were
    /// removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.expiries.len();
        self.expiries.retain(|_, until| *until > now);
        before - self.expiries.len()
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Category, &DateTime<Utc>)> {
        self.expiries.iter()
    }
}
