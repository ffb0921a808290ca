//! Token-bucket admission control, two buckets per credential.
//!
//! Read operations (GET) and write operations (POST/DELETE) draw from
//! independent buckets so a burst of orderbook polling never starves order
//! placement. Buckets refill lazily: available tokens are recomputed from
//! elapsed time on each acquire, there is no background refill task.
//!
//! With `DISTRIBUTED_RATE_LIMITS=true` the buckets live in Redis and every
//! acquire is a WATCH/MULTI read-modify-write, so multiple service instances
//! sharing a credential share its budget. A lost WATCH race retries
//! immediately; an unreachable Redis fails open to the in-memory bucket.

use chrono::Utc;
use log::warn;
use parking_lot::Mutex;
use predict_rust_core::redis::RedisBus;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration, Instant};

/// Waiters sleep in small increments so a refilled bucket is picked up
/// promptly and no caller ever parks unboundedly on one computed deadline.
const MAX_SLEEP_INCREMENT: Duration = Duration::from_millis(50);

/// Shared-store keys expire well after any realistic idle period.
const SHARED_KEY_TTL_SECS: i64 = 3600;

struct BucketState {
    available: f64,
    last_refill: Instant,
}

/// In-memory continuous-refill token bucket.
///
/// `capacity` is both the burst size and the refill rate per second.
pub struct TokenBucket {
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64) -> Self {
        let capacity = capacity.max(0.001);
        Self {
            capacity,
            state: Mutex::new(BucketState {
                available: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill from elapsed time, then either take the tokens or report how
    /// long until enough will have accrued.
    fn try_take(&self, tokens: f64) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.available = (state.available + elapsed * self.capacity).min(self.capacity);
        state.last_refill = now;

        if state.available >= tokens {
            state.available -= tokens;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (tokens - state.available) / self.capacity,
            ))
        }
    }

    /// Wait until `tokens` are available, then deduct them atomically.
    /// Batched submissions pass the whole item count so a batch is either
    /// fully admitted or still waiting, never partially admitted.
    pub async fn acquire(&self, tokens: f64) {
        // A request larger than the bucket would otherwise wait forever.
        let tokens = tokens.min(self.capacity);
        loop {
            match self.try_take(tokens) {
                Ok(()) => return,
                Err(wait) => sleep(wait.min(MAX_SLEEP_INCREMENT)).await,
            }
        }
    }

    /// Current token count after refill. For tests and diagnostics.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.available = (state.available + elapsed * self.capacity).min(self.capacity);
        state.last_refill = now;
        state.available
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SharedBucketState {
    available: f64,
    /// Unix milliseconds of the last refill, wall clock (shared across hosts).
    ts: i64,
}

/// Token bucket optionally backed by a shared Redis key.
///
/// Without a bus this is a thin wrapper over [`TokenBucket`]. With one, each
/// acquire runs a conditional read-modify-write; contention between
/// concurrent writers is resolved internally and never surfaced.
pub struct SharedTokenBucket {
    key: String,
    capacity: f64,
    redis: Option<RedisBus>,
    fallback: TokenBucket,
}

impl SharedTokenBucket {
    pub fn local(key: impl Into<String>, capacity: f64) -> Self {
        Self {
            key: key.into(),
            capacity: capacity.max(0.001),
            redis: None,
            fallback: TokenBucket::new(capacity),
        }
    }

    pub fn shared(key: impl Into<String>, capacity: f64, redis: RedisBus) -> Self {
        Self {
            key: key.into(),
            capacity: capacity.max(0.001),
            redis: Some(redis),
            fallback: TokenBucket::new(capacity),
        }
    }

    pub async fn acquire(&self, tokens: f64) {
        let tokens = tokens.min(self.capacity);
        let Some(bus) = &self.redis else {
            return self.fallback.acquire(tokens).await;
        };

        loop {
            match self.try_take_shared(bus, tokens).await {
                Ok(None) => return,
                Ok(Some(wait)) => sleep(wait.min(MAX_SLEEP_INCREMENT)).await,
                Err(e) => {
                    // Distinct from ordinary contention: the store itself is
                    // down, so this instance degrades to a process-local
                    // budget until the next acquire.
                    warn!(
                        "Shared rate limiter store unreachable for {} (failing open to in-memory bucket): {}",
                        self.key, e
                    );
                    return self.fallback.acquire(tokens).await;
                }
            }
        }
    }

    /// One WATCH/GET/MULTI/EXEC round. `Ok(None)` means the tokens were
    /// taken; `Ok(Some(wait))` means not enough accrued yet. A concurrent
    /// writer invalidating the WATCH retries immediately inside this call.
    async fn try_take_shared(
        &self,
        bus: &RedisBus,
        tokens: f64,
    ) -> anyhow::Result<Option<Duration>> {
        let mut conn = bus.get_connection().await?;
        loop {
            redis::cmd("WATCH")
                .arg(&self.key)
                .query_async::<_, ()>(&mut conn)
                .await?;

            let raw: Option<String> = conn.get(&self.key).await?;
            let now_ms = Utc::now().timestamp_millis();
            let state = raw
                .as_deref()
                .and_then(|s| serde_json::from_str::<SharedBucketState>(s).ok())
                .unwrap_or(SharedBucketState {
                    available: self.capacity,
                    ts: now_ms,
                });

            let elapsed_secs = (now_ms - state.ts).max(0) as f64 / 1000.0;
            let available = (state.available + elapsed_secs * self.capacity).min(self.capacity);

            if available < tokens {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut conn).await?;
                return Ok(Some(Duration::from_secs_f64(
                    (tokens - available) / self.capacity,
                )));
            }

            let next = serde_json::to_string(&SharedBucketState {
                available: available - tokens,
                ts: now_ms,
            })?;

            let committed: Option<()> = redis::pipe()
                .atomic()
                .set(&self.key, next)
                .ignore()
                .expire(&self.key, SHARED_KEY_TTL_SECS)
                .ignore()
                .query_async(&mut conn)
                .await?;

            match committed {
                Some(()) => return Ok(None),
                // Another writer touched the key between WATCH and EXEC.
                None => continue,
            }
        }
    }
}

/// The read/write bucket pair for one credential.
pub struct CredentialRateLimiter {
    read: SharedTokenBucket,
    write: SharedTokenBucket,
}

impl CredentialRateLimiter {
    pub fn new(
        key_id: &str,
        read_capacity: f64,
        write_capacity: f64,
        redis: Option<RedisBus>,
    ) -> Self {
        let read_key = format!("ratelimit:{}:read", key_id);
        let write_key = format!("ratelimit:{}:write", key_id);
        match redis {
            Some(bus) => Self {
                read: SharedTokenBucket::shared(read_key, read_capacity, bus.clone()),
                write: SharedTokenBucket::shared(write_key, write_capacity, bus),
            },
            None => Self {
                read: SharedTokenBucket::local(read_key, read_capacity),
                write: SharedTokenBucket::local(write_key, write_capacity),
            },
        }
    }

    /// Gate one read operation (orderbook, market metadata, balance).
    pub async fn acquire_read(&self) {
        self.read.acquire(1.0).await;
    }

    /// Gate `count` write operations. The whole batch is admitted at once.
    pub async fn acquire_write(&self, count: u32) {
        self.write.acquire(f64::from(count)).await;
    }
}
