//! Payload categories used for independent rate-limit accounting.

use std::borrow::Cow;
use std::fmt;

/// A label classifying a telemetry payload.
///
/// Well-known categories are `'static` and never allocate; categories read
/// off the wire are owned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(Cow<'static, str>);

impl Category {
    /// Wildcard: a lockout on `all` limits every category.
    pub const ALL: Category = Category(Cow::Borrowed("all"));
    /// Payloads without a more specific category.
    pub const DEFAULT: Category = Category(Cow::Borrowed("default"));
    /// Error and message events.
    pub const ERROR: Category = Category(Cow::Borrowed("error"));
    /// Performance transactions.
    pub const TRANSACTION: Category = Category(Cow::Borrowed("transaction"));
    /// Release-health sessions.
    pub const SESSION: Category = Category(Cow::Borrowed("session"));
    /// File attachments.
    pub const ATTACHMENT: Category = Category(Cow::Borrowed("attachment"));

    /// Create a category from any string.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The category name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the `all` wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.as_str() == Self::ALL.as_str()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Category {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}
