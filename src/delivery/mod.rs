//! Bounded-concurrency execution of outbound requests.

mod queue;

pub use queue::{DeliveryError, DeliveryQueue, Submission, DEFAULT_QUEUE_CAPACITY};
