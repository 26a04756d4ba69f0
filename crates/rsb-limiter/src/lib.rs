//! Outbound call throttling and retry.
//!
//! Two cooperating pieces:
//! - [`RateLimiter`]: token buckets, one per remote endpoint family, that
//!   callers must pass through before any commerce call.
//! - [`RetryExecutor`]: exponential backoff with jitter around failures the
//!   error taxonomy classifies as transient.
//!
//! Neither piece issues remote calls itself; they only pace and re-invoke
//! caller-supplied futures.

pub mod bucket;
pub mod retry;

pub use bucket::{EndpointFamily, RateLimiter};
pub use retry::{RetryExecutor, RetryPolicy};
