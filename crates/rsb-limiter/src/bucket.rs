//! Token-bucket pacing for outbound commerce calls.
//!
//! Bucket math is pure (`BucketState`) and driven by explicit instants so
//! tests never sleep; the async wrapper owns the clock and the waiting.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
// tokio's Instant so paused-clock tests drive refill deterministically;
// outside a test runtime it is the std monotonic clock.
use tokio::time::Instant;

/// Remote endpoint families with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointFamily {
    /// Product/variant/collection GraphQL mutations and queries.
    GraphqlMutation,
    /// Inventory activation and on-hand updates.
    RestInventory,
    /// Automatic discount mutations.
    Discount,
}

impl EndpointFamily {
    pub const ALL: [EndpointFamily; 3] = [
        EndpointFamily::GraphqlMutation,
        EndpointFamily::RestInventory,
        EndpointFamily::Discount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointFamily::GraphqlMutation => "graphql",
            EndpointFamily::RestInventory => "inventory",
            EndpointFamily::Discount => "discount",
        }
    }
}

/// Pure token-bucket state: `capacity` burst, `refill_per_sec` steady rate.
#[derive(Debug, Clone)]
struct BucketState {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last: Instant,
    /// While set, the bucket yields nothing until this instant (server
    /// instructed us to back off).
    frozen_until: Option<Instant>,
}

impl BucketState {
    fn new(rate: u32, now: Instant) -> Self {
        let capacity = rate.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity,
            last: now,
            frozen_until: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        if let Some(until) = self.frozen_until {
            if now < until {
                return;
            }
            // Penalty over; restart from an empty bucket.
            self.frozen_until = None;
            self.tokens = 0.0;
            self.last = now;
        }
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    /// Take one token, or report how long to wait before retrying.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if let Some(until) = self.frozen_until {
            return Err(until.duration_since(now));
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
    }

    /// Surrender the remaining budget and freeze until `now + penalty`.
    fn freeze(&mut self, now: Instant, penalty: Duration) {
        self.tokens = 0.0;
        self.frozen_until = Some(now + penalty);
        self.last = now;
    }
}

/// Per-family token buckets guarding the commerce API.
pub struct RateLimiter {
    buckets: Mutex<HashMap<EndpointFamily, BucketState>>,
}

impl RateLimiter {
    /// `rate` is both the refill (tokens/second) and the burst capacity.
    pub fn new(rate: u32) -> Self {
        let now = Instant::now();
        let buckets = EndpointFamily::ALL
            .iter()
            .map(|f| (*f, BucketState::new(rate, now)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    /// Block until a token for `family` is available. Returns the total time
    /// spent waiting so callers can feed it to metrics.
    pub async fn acquire(&self, family: EndpointFamily) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.get_mut(&family).expect("bucket exists");
                match bucket.try_take(Instant::now()) {
                    Ok(()) => None,
                    Err(wait) => Some(wait),
                }
            };
            match wait {
                None => {
                    if !waited.is_zero() {
                        metrics::histogram!(
                            "commerce_rate_limit_wait_seconds",
                            "family" => family.as_str(),
                        )
                        .record(waited.as_secs_f64());
                    }
                    return waited;
                }
                Some(wait) => {
                    waited += wait;
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Server said 429: surrender the remaining budget for `family` and keep
    /// the bucket empty for the server-supplied interval.
    pub async fn penalize(&self, family: EndpointFamily, retry_after: Duration) {
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(&family) {
            bucket.freeze(Instant::now(), retry_after);
        }
        metrics::counter!("commerce_throttled_total", "family" => family.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(rate: u32) -> (BucketState, Instant) {
        let now = Instant::now();
        (BucketState::new(rate, now), now)
    }

    #[test]
    fn burst_up_to_capacity_then_wait() {
        let (mut b, now) = state(2);
        assert!(b.try_take(now).is_ok());
        assert!(b.try_take(now).is_ok());
        let wait = b.try_take(now).unwrap_err();
        // Empty bucket at 2 tokens/s: next token in 0.5s.
        assert!(wait > Duration::from_millis(400) && wait <= Duration::from_millis(500));
    }

    #[test]
    fn refill_restores_tokens() {
        let (mut b, now) = state(2);
        assert!(b.try_take(now).is_ok());
        assert!(b.try_take(now).is_ok());
        assert!(b.try_take(now + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn refill_caps_at_capacity() {
        let (mut b, now) = state(2);
        // A long idle period must not bank more than `capacity` tokens.
        let later = now + Duration::from_secs(60);
        assert!(b.try_take(later).is_ok());
        assert!(b.try_take(later).is_ok());
        assert!(b.try_take(later).is_err());
    }

    #[test]
    fn freeze_discards_budget_until_deadline() {
        let (mut b, now) = state(5);
        b.freeze(now, Duration::from_secs(3));
        let wait = b.try_take(now + Duration::from_secs(1)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(2));
        // After the deadline the bucket restarts empty, not at capacity.
        let wait = b.try_take(now + Duration::from_secs(3)).unwrap_err();
        assert!(wait > Duration::ZERO);
        // And refills at the normal rate afterwards.
        assert!(b.try_take(now + Duration::from_secs(4)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_when_exhausted() {
        let limiter = RateLimiter::new(1);
        assert_eq!(
            limiter.acquire(EndpointFamily::GraphqlMutation).await,
            Duration::ZERO
        );
        // Second acquire must wait ~1s of virtual time, not block forever.
        let waited = limiter.acquire(EndpointFamily::GraphqlMutation).await;
        assert!(waited >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn families_have_independent_budgets() {
        let limiter = RateLimiter::new(1);
        limiter.acquire(EndpointFamily::GraphqlMutation).await;
        // GraphQL bucket is empty, inventory bucket is not.
        let waited = limiter.acquire(EndpointFamily::RestInventory).await;
        assert_eq!(waited, Duration::ZERO);
    }
}
