//! Collector DSN parsing.
//!
//! A DSN has the form `{scheme}://{public_key}@{host}[:{port}]/[{path}/]{project_id}`.
//! It determines where payloads are posted and which key authenticates them.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;

use crate::error::{BeaconError, Result};

/// Protocol version announced in the auth header.
const PROTOCOL_VERSION: u8 = 7;

/// A parsed collector DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    scheme: String,
    public_key: String,
    host: String,
    port: Option<u16>,
    path: String,
    project_id: String,
}

impl Dsn {
    /// Parse and validate a DSN string.
    pub fn parse(dsn: &str) -> Result<Self> {
        let dsn = dsn.trim();
        if dsn.is_empty() {
            return Err(BeaconError::Dsn("DSN string is required".to_string()));
        }

        let url = Url::parse(dsn).map_err(|e| BeaconError::Dsn(format!("{dsn}: {e}")))?;

        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(BeaconError::Dsn(format!("unsupported scheme '{scheme}'")));
        }

        let public_key = url.username();
        if public_key.is_empty() {
            return Err(BeaconError::Dsn("missing public key".to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| BeaconError::Dsn("missing host".to_string()))?;

        let full_path = url.path().trim_end_matches('/');
        let (path, project_id) = match full_path.rfind('/') {
            Some(idx) => (&full_path[..idx], &full_path[idx + 1..]),
            None => ("", full_path),
        };
        if project_id.is_empty() {
            return Err(BeaconError::Dsn("missing project id".to_string()));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            public_key: public_key.to_string(),
            host: host.to_string(),
            port: url.port(),
            path: path.to_string(),
            project_id: project_id.to_string(),
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Base URL without the project id, e.g. `https://host:9000/prefix`.
    fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}{}", self.scheme, self.host, port, self.path),
            None => format!("{}://{}{}", self.scheme, self.host, self.path),
        }
    }

    /// Endpoint that accepts single JSON events.
    pub fn store_url(&self) -> String {
        format!("{}/api/{}/store/", self.base_url(), self.project_id)
    }

    /// Value of the `X-Sentry-Auth` header for this DSN.
    pub fn auth_header(&self) -> String {
        format!(
            "Sentry sentry_version={}, sentry_client=beacon/{}, sentry_key={}",
            PROTOCOL_VERSION,
            env!("CARGO_PKG_VERSION"),
            self.public_key
        )
    }
}

impl FromStr for Dsn {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(
                f,
                "{}://{}@{}:{}{}/{}",
                self.scheme, self.public_key, self.host, port, self.path, self.project_id
            ),
            None => write!(
                f,
                "{}://{}@{}{}/{}",
                self.scheme, self.public_key, self.host, self.path, self.project_id
            ),
        }
    }
}
