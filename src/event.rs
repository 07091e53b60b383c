//! Minimal message events.
//!
//! Enough of the event payload to capture a log message with a severity,
//! an environment, a release and a handful of tags.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Tag carrying the originating trace category.
pub const TRACE_CATEGORY_TAG: &str = "trace_category";

/// Event severity. The collector only distinguishes these three for messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    #[default]
    Error,
}

/// Message types emitted by a trace writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMessageType {
    Log,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Map a trace message type to an event level; unknown types are errors.
    pub fn from_trace_type(kind: Option<TraceMessageType>) -> Self {
        match kind {
            Some(TraceMessageType::Log) | Some(TraceMessageType::Info) => Level::Info,
            Some(TraceMessageType::Warn) => Level::Warning,
            Some(TraceMessageType::Error) | None => Level::Error,
        }
    }
}

/// A message event ready to be serialized into a request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 32 hex characters, no hyphens
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub platform: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Event {
    /// Capture `message` at `level`, stamped now.
    pub fn message(message: impl Into<String>, level: Level) -> Self {
        Self {
            event_id: Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            level,
            platform: "native".to_string(),
            message: message.into(),
            environment: None,
            release: None,
            tags: BTreeMap::new(),
        }
    }

    /// Capture a trace message, tagging it with its trace category.
    pub fn from_trace(message: impl Into<String>, category: &str, kind: Option<TraceMessageType>) -> Self {
        Self::message(message, Level::from_trace_type(kind)).with_tag(TRACE_CATEGORY_TAG, category)
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Serialize to the JSON request body.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
