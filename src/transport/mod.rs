//! Delivery of telemetry payloads to the collector over HTTP.

mod http;
mod outcome;
mod request;
mod sender;

pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use outcome::{FailureCause, SendOutcome};
pub use request::{SendRequest, DEFAULT_TIMEOUT};
pub use sender::{Transport, AUTH_HEADER};
