//! Token-bucket rate limiting, per-user and global.
//!
//! Every inbound download request is charged against two buckets: one
//! global bucket shared by all users and one per-user bucket created
//! lazily on first request. Refill is computed lazily from elapsed time
//! on each access; there is no background refill task.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::core::error::BotError;

/// Single token bucket with continuous lazy refill.
///
/// Tokens are stored as a float so that fractional refill accumulates
/// between accesses; capacity is an integer ceiling.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a bucket filled to capacity.
    ///
    /// Callers are expected to have validated `capacity >= 1` and
    /// `refill_rate > 0` (see [`RateLimiter::new`]).
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Refills tokens based on elapsed time, clamped to capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        // Instant is monotonic, so elapsed can never be negative.
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Tries to consume `n` tokens after a lazy refill.
    ///
    /// Returns `false` and leaves the token count unchanged when fewer
    /// than `n` tokens are available.
    pub fn consume(&mut self, n: u32) -> bool {
        self.refill();

        if self.tokens >= f64::from(n) {
            self.tokens -= f64::from(n);
            return true;
        }

        false
    }

    /// Time until the next token is available; zero if one is ready now.
    pub fn time_until_ready(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }

        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
    }

    /// Resets the bucket to full capacity. Administrative override only.
    pub fn reset(&mut self) {
        self.tokens = f64::from(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Current token count (not refilled; call after a refilling operation).
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Configured capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Timestamp of the last refill, used by the idle-bucket sweep.
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    /// Request admitted; both buckets had a token.
    Allowed,
    /// Request denied; `wait` estimates when the next token accrues.
    Denied { wait: Duration },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allowed)
    }
}

/// Read-only rate-limit snapshot for one user.
#[derive(Debug, Clone, Copy)]
pub struct UserRateStatus {
    pub tokens: f64,
    pub capacity: u32,
    pub wait: Duration,
}

struct LimiterState {
    global: TokenBucket,
    users: HashMap<i64, TokenBucket>,
}

/// Per-user rate limiter composed with a global limit.
///
/// The global bucket is always consulted first. This bounds worst-case
/// memory growth: a burst that never gets past the global gate does not
/// churn per-user buckets. A global token stays consumed even when the
/// user bucket subsequently denies the request, so heavy users still
/// spend shared capacity.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
    user_capacity: u32,
    user_refill_rate: f64,
}

impl RateLimiter {
    /// Creates a rate limiter with the given bucket parameters.
    ///
    /// # Errors
    /// Returns `BotError::Config` if any capacity is zero or any refill
    /// rate is not strictly positive.
    pub fn new(
        user_capacity: u32,
        user_refill_rate: f64,
        global_capacity: u32,
        global_refill_rate: f64,
    ) -> Result<Self, BotError> {
        if user_capacity == 0 || global_capacity == 0 {
            return Err(BotError::Config("rate limit capacity must be at least 1".to_string()));
        }
        if user_refill_rate <= 0.0 || global_refill_rate <= 0.0 {
            return Err(BotError::Config("rate limit refill rate must be positive".to_string()));
        }

        log::info!(
            "RateLimiter initialized: user={}/{}/s, global={}/{}/s",
            user_capacity,
            user_refill_rate,
            global_capacity,
            global_refill_rate
        );

        Ok(Self {
            state: Arc::new(Mutex::new(LimiterState {
                global: TokenBucket::new(global_capacity, global_refill_rate),
                users: HashMap::new(),
            })),
            user_capacity,
            user_refill_rate,
        })
    }

    /// Checks whether `user_id` may make a request, consuming tokens.
    ///
    /// The global bucket is consumed first; on a global denial the user
    /// bucket is not touched at all. On a user-bucket denial the global
    /// token already spent is not returned.
    pub async fn check_limit(&self, user_id: i64) -> LimitDecision {
        let mut state = self.state.lock().await;

        if !state.global.consume(1) {
            let wait = state.global.time_until_ready();
            log::warn!("Global rate limit hit, wait: {:.1}s", wait.as_secs_f64());
            return LimitDecision::Denied { wait };
        }

        let user_capacity = self.user_capacity;
        let user_refill_rate = self.user_refill_rate;
        let bucket = state
            .users
            .entry(user_id)
            .or_insert_with(|| TokenBucket::new(user_capacity, user_refill_rate));

        if !bucket.consume(1) {
            let wait = bucket.time_until_ready();
            log::info!("User {} rate limited, wait: {:.1}s", user_id, wait.as_secs_f64());
            return LimitDecision::Denied { wait };
        }

        log::debug!("User {} request allowed", user_id);
        LimitDecision::Allowed
    }

    /// Resets the bucket of a single user. No-op if the user has none yet.
    pub async fn reset_user(&self, user_id: i64) {
        let mut state = self.state.lock().await;
        if let Some(bucket) = state.users.get_mut(&user_id) {
            bucket.reset();
            log::info!("Reset rate limit for user {}", user_id);
        }
    }

    /// Resets the global bucket.
    pub async fn reset_global(&self) {
        let mut state = self.state.lock().await;
        state.global.reset();
        log::info!("Reset global rate limit");
    }

    /// Read-only snapshot of a user's bucket after a lazy refill.
    ///
    /// Does not consume a token. Creates the bucket if the user has
    /// never been seen, same as a first `check_limit` would.
    pub async fn get_user_status(&self, user_id: i64) -> UserRateStatus {
        let mut state = self.state.lock().await;
        let user_capacity = self.user_capacity;
        let user_refill_rate = self.user_refill_rate;
        let bucket = state
            .users
            .entry(user_id)
            .or_insert_with(|| TokenBucket::new(user_capacity, user_refill_rate));

        let wait = bucket.time_until_ready();
        UserRateStatus {
            tokens: bucket.tokens(),
            capacity: bucket.capacity(),
            wait,
        }
    }

    /// Removes per-user buckets idle for longer than `max_age`.
    ///
    /// Returns how many buckets were removed. Intended to be called
    /// periodically by an external task (see `main`); the limiter does
    /// not schedule the sweep itself.
    pub async fn cleanup_old_buckets(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let before = state.users.len();
        state
            .users
            .retain(|_, bucket| now.duration_since(bucket.last_refill()) < max_age);
        let removed = before - state.users.len();

        if removed > 0 {
            log::info!("Cleaned up {} old rate limit buckets", removed);
        }
        removed
    }

    /// Number of per-user buckets currently held.
    pub async fn tracked_users(&self) -> usize {
        self.state.lock().await.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bucket_allows_burst_up_to_capacity() {
        let mut bucket = TokenBucket::new(3, 1.0);

        assert!(bucket.consume(1));
        assert!(bucket.consume(1));
        assert!(bucket.consume(1));
        assert!(!bucket.consume(1));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(2, 1.0);
        assert!(bucket.consume(2));
        assert!(!bucket.consume(1));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(bucket.consume(1));
        // Only ~0.5 tokens left after the refill.
        assert!(!bucket.consume(1));
    }

    #[tokio::test(start_paused = true)]
    async fn time_until_ready_is_zero_when_token_available() {
        let mut bucket = TokenBucket::new(1, 0.5);
        assert_eq!(bucket.time_until_ready(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn time_until_ready_matches_deficit() {
        let mut bucket = TokenBucket::new(1, 0.5);
        assert!(bucket.consume(1));

        // One token at 0.5 tokens/s takes 2 seconds to accrue.
        let wait = bucket.time_until_ready();
        assert!((wait.as_secs_f64() - 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restores_full_capacity() {
        let mut bucket = TokenBucket::new(5, 0.1);
        assert!(bucket.consume(5));
        bucket.reset();
        assert!(bucket.consume(5));
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_rejects_invalid_parameters() {
        assert!(RateLimiter::new(0, 1.0, 10, 1.0).is_err());
        assert!(RateLimiter::new(5, 0.0, 10, 1.0).is_err());
        assert!(RateLimiter::new(5, 1.0, 0, 1.0).is_err());
        assert!(RateLimiter::new(5, 1.0, 10, -1.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn global_denial_does_not_touch_user_bucket() {
        let limiter = RateLimiter::new(5, 1.0, 1, 0.001).unwrap();

        // First request drains the global bucket and one user token.
        assert!(limiter.check_limit(42).await.is_allowed());

        // Second request is globally denied; the user bucket keeps its
        // remaining 4 tokens.
        let decision = limiter.check_limit(42).await;
        assert!(!decision.is_allowed());

        let status = limiter.get_user_status(42).await;
        assert!((status.tokens - 4.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn no_refund_on_user_denial() {
        let limiter = RateLimiter::new(1, 0.001, 3, 0.001).unwrap();

        assert!(limiter.check_limit(7).await.is_allowed());
        // User bucket empty now; each further check still burns a global token.
        assert!(!limiter.check_limit(7).await.is_allowed());
        assert!(!limiter.check_limit(7).await.is_allowed());

        // Global bucket is drained by the denied requests: a different
        // user gets a global denial with the remaining 0 tokens.
        let decision = limiter.check_limit(8).await;
        assert!(!decision.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_with_zero_age_removes_everything() {
        let limiter = RateLimiter::new(5, 1.0, 100, 1.0).unwrap();
        limiter.check_limit(1).await;
        limiter.check_limit(2).await;
        assert_eq!(limiter.tracked_users().await, 2);

        let removed = limiter.cleanup_old_buckets(Duration::ZERO).await;
        assert_eq!(removed, 2);
        assert_eq!(limiter.tracked_users().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_with_huge_age_removes_nothing() {
        let limiter = RateLimiter::new(5, 1.0, 100, 1.0).unwrap();
        limiter.check_limit(1).await;
        limiter.check_limit(2).await;

        let removed = limiter.cleanup_old_buckets(Duration::from_secs(86_400)).await;
        assert_eq!(removed, 0);
        assert_eq!(limiter.tracked_users().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_user_is_noop_for_unknown_user() {
        let limiter = RateLimiter::new(5, 1.0, 100, 1.0).unwrap();
        limiter.reset_user(999).await;
        assert_eq!(limiter.tracked_users().await, 0);
    }
}
