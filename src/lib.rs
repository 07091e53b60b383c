//! Beacon - Rate-Limit Aware Telemetry Transport
//!
//! This crate ships telemetry payloads to a remote collector over HTTP. It
//! honors server-driven rate limiting per payload category, bounds the
//! number of concurrent outbound requests with fail-fast backpressure, and
//! reports every send as a typed outcome.

pub mod clock;
pub mod config;
pub mod delivery;
pub mod dsn;
pub mod error;
pub mod event;
pub mod ratelimit;
pub mod transport;
