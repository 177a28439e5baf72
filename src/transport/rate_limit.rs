//! Dual token-bucket admission control
//!
//! Two buckets gate every incoming connection: a global bucket shared by
//! all sources and one bucket per source address. Both refill
//! continuously at their capacity per second and an admission must find a
//! positive balance in each. Per-address buckets idle for a minute are
//! swept away by a background task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Default global bucket capacity (tokens, refilled per second)
pub const DEFAULT_GLOBAL_CAPACITY: f64 = 500.0;

/// Default per-source bucket capacity (tokens, refilled per second)
pub const DEFAULT_SINGLE_CAPACITY: f64 = 5.0;

/// Cadence of the stale-bucket sweep
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Idle age at which a per-source bucket is dropped
const BUCKET_IDLE_LIMIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

/// Connection admission limiter
#[derive(Debug)]
pub struct RateLimiter {
    global_capacity: f64,
    single_capacity: f64,
    /// Global token balance, stored as f64 bits
    global_tokens: AtomicU64,
    /// Nanoseconds since `epoch` of the last global refill
    global_last_update: AtomicU64,
    epoch: Instant,
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
}

impl RateLimiter {
    /// Create a limiter with explicit capacities
    pub fn new(global_capacity: f64, single_capacity: f64) -> Self {
        Self {
            global_capacity,
            single_capacity,
            global_tokens: AtomicU64::new(global_capacity.to_bits()),
            global_last_update: AtomicU64::new(0),
            epoch: Instant::now(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a connection from `addr` may proceed
    ///
    /// Refills both buckets from elapsed wall time, then requires a
    /// positive balance in each. Balances are decremented even on denial,
    /// so a flooding source digs itself a deeper hole.
    pub fn allow_connection(&self, addr: IpAddr) -> bool {
        let now = Instant::now();

        let allowed = {
            let mut buckets = self.buckets.lock().expect("rate limiter poisoned");
            let bucket = buckets.entry(addr).or_insert(TokenBucket {
                tokens: self.single_capacity,
                last_update: now,
            });
            let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
            bucket.tokens =
                (bucket.tokens + elapsed * self.single_capacity).min(self.single_capacity);
            bucket.last_update = now;
            let allowed = bucket.tokens > 0.0;
            bucket.tokens -= 1.0;
            allowed
        };

        if !allowed {
            return false;
        }

        let now_nanos = now.duration_since(self.epoch).as_nanos() as u64;
        let last_nanos = self.global_last_update.load(Ordering::Relaxed);
        let elapsed = Duration::from_nanos(now_nanos.saturating_sub(last_nanos)).as_secs_f64();

        let mut tokens = f64::from_bits(self.global_tokens.load(Ordering::Relaxed));
        tokens = (tokens + elapsed * self.global_capacity).min(self.global_capacity);
        let allowed = tokens > 0.0;
        self.global_tokens
            .store((tokens - 1.0).to_bits(), Ordering::Relaxed);
        self.global_last_update.store(now_nanos, Ordering::Relaxed);
        allowed
    }

    /// Drop per-source buckets idle for longer than `max_idle`
    pub fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter poisoned");
        buckets.retain(|_, bucket| now.duration_since(bucket.last_update) < max_idle);
    }

    /// Start the background sweep over stale per-source buckets
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.purge_stale(BUCKET_IDLE_LIMIT);
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_CAPACITY, DEFAULT_SINGLE_CAPACITY)
    }
}
