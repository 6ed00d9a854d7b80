//! Network plumbing - reachability signal and retry/backoff wrapper

mod reachability;
mod retry;

pub use reachability::ReachabilityMonitor;
pub use retry::{with_retry, Retryable, RetryPolicy};
