use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds the caller should wait before retrying; zero when allowed.
    pub retry_after: u64,
}

struct Sweeper {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Per-tenant sliding-window limiter. One mutex guards all buckets; the
/// critical section walks a single bucket, whose length is bounded by
/// `max_requests`.
#[derive(Clone)]
pub struct TenantRateLimiter {
    max_requests: usize,
    window: Duration,
    buckets: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    sweeper: Arc<AsyncMutex<Option<Sweeper>>>,
}

impl TenantRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests.max(1),
            window: config.window,
            buckets: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Arc::new(AsyncMutex::new(None)),
        }
    }

    pub fn allow(&self, tenant_id: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("mutex poisoned");
        let bucket = buckets.entry(tenant_id.to_string()).or_default();

        // Timestamps are appended in order, so retaining the recent suffix
        // keeps the slice sorted with the oldest entry first.
        bucket.retain(|at| now.duration_since(*at) < self.window);

        if bucket.len() >= self.max_requests {
            let oldest = bucket[0];
            let remaining = self
                .window
                .checked_sub(now.duration_since(oldest))
                .unwrap_or_default();
            let retry_after = (remaining.as_secs_f64().ceil() as u64).max(1);
            return RateDecision {
                allowed: false,
                retry_after,
            };
        }

        bucket.push(now);
        RateDecision {
            allowed: true,
            retry_after: 0,
        }
    }

    /// Starts the five-minute sweep that drops expired timestamps and empty
    /// buckets. Idempotent per limiter.
    pub async fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock().await;
        if slot.is_some() {
            warn!("rate-limit sweeper already running");
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let buckets = self.buckets.clone();
        let window = self.window;
        let task = tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sweep(&buckets, window);
                        if removed > 0 {
                            debug!(removed, "swept idle rate-limit buckets");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        *slot = Some(Sweeper { stop, task });
    }

    /// Signals the sweeper and waits for its termination.
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().await.take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.stop.send(true);
            if let Err(err) = sweeper.task.await {
                warn!(?err, "rate-limit sweeper did not shut down cleanly");
            }
        }
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.lock().expect("mutex poisoned").len()
    }
}

fn sweep(buckets: &Arc<Mutex<HashMap<String, Vec<Instant>>>>, window: Duration) -> usize {
    let now = Instant::now();
    let mut buckets = buckets.lock().expect("mutex poisoned");
    let before = buckets.len();
    buckets.retain(|_, bucket| {
        bucket.retain(|at| now.duration_since(*at) < window);
        !bucket.is_empty()
    });
    before - buckets.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: usize, window: Duration) -> TenantRateLimiter {
        TenantRateLimiter::new(&RateLimitConfig {
            max_requests,
            window,
        })
    }

    #[test]
    fn denies_exactly_at_the_limit() {
        let limiter = limiter(3, Duration::from_secs(60));
        assert!(limiter.allow("t1").allowed);
        assert!(limiter.allow("t1").allowed);
        assert!(limiter.allow("t1").allowed);

        let denied = limiter.allow("t1");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, 60);
    }

    #[test]
    fn tenants_do_not_share_buckets() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.allow("t1").allowed);
        assert!(limiter.allow("t2").allowed);
        assert!(!limiter.allow("t1").allowed);
    }

    #[test]
    fn window_expiry_frees_capacity() {
        let limiter = limiter(1, Duration::from_millis(30));
        assert!(limiter.allow("t1").allowed);
        assert!(!limiter.allow("t1").allowed);
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.allow("t1").allowed);
    }

    #[test]
    fn retry_after_is_clamped_to_at_least_one_second() {
        let limiter = limiter(1, Duration::from_millis(200));
        assert!(limiter.allow("t1").allowed);
        let denied = limiter.allow("t1");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, 1);
    }

    #[test]
    fn sweep_removes_empty_buckets_only() {
        let limiter = limiter(5, Duration::from_millis(20));
        limiter.allow("idle");
        limiter.allow("busy");
        std::thread::sleep(Duration::from_millis(30));
        limiter.allow("busy");

        let removed = sweep(&limiter.buckets, limiter.window);
        assert_eq!(removed, 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[tokio::test]
    async fn sweeper_stops_cleanly() {
        let limiter = limiter(1, Duration::from_secs(1));
        limiter.start_sweeper().await;
        limiter.stop().await;
        limiter.stop().await;
    }
}
