//! Exponential backoff with jitter around classified transient failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rsb_schemas::{SyncError, SyncResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay before attempt `n + 1`
    /// (`n` is 1-based): `base · 2^(n−1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts attempts.
    ///
    /// - Permanent failures return immediately, untouched.
    /// - Transient failures sleep `base·2^(n−1) + rand(0, jitter)` — or the
    ///   server-supplied retry interval when the error carries one — then
    ///   try again.
    /// - Cancellation is honoured between attempts; the in-flight attempt is
    ///   never aborted mid-call.
    pub async fn execute<T, F, Fut>(
        &self,
        op_name: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::cancelled());
            }

            match op().await {
                Ok(value) => {
                    metrics::counter!("sync_call_attempts_total", "op" => op_name)
                        .increment(u64::from(attempt));
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = match err.retry_after_secs {
                        Some(secs) => Duration::from_secs(secs),
                        None => self.policy.backoff(attempt) + self.random_jitter(),
                    };
                    warn!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        code = %err.code,
                        "transient failure, retrying"
                    );
                    metrics::counter!("sync_retries_total", "op" => op_name).increment(1);

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SyncError::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    metrics::counter!("sync_call_attempts_total", "op" => op_name)
                        .increment(u64::from(attempt));
                    metrics::counter!(
                        "sync_call_failures_total",
                        "op" => op_name,
                        "kind" => err.kind.as_str(),
                    )
                    .increment(1);
                    return Err(err);
                }
            }
        }
    }

    fn random_jitter(&self) -> Duration {
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}
