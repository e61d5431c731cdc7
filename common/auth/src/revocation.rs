use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RevocationConfig {
    pub sweep_interval: Duration,
    /// How long a user-level revoke-before entry outlives its cutoff. Must be
    /// at least the longest token TTL the process issues or accepts.
    pub user_entry_retention: Duration,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            user_entry_retention: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// jti → the token's own expiry; entries are useless past it.
    tokens: HashMap<String, DateTime<Utc>>,
    /// user id → reject tokens issued at or before this instant.
    users: HashMap<String, DateTime<Utc>>,
}

struct Sweeper {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Process-local revocation lookups for session tokens. One instance per
/// process; the sweeper prunes entries whose tokens could no longer validate
/// anyway.
#[derive(Clone)]
pub struct RevocationStore {
    inner: Arc<Mutex<Inner>>,
    config: RevocationConfig,
    sweeper: Arc<AsyncMutex<Option<Sweeper>>>,
}

impl RevocationStore {
    pub fn new(config: RevocationConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            config,
            sweeper: Arc::new(AsyncMutex::new(None)),
        }
    }

    pub fn revoke_token(&self, jti: &str, expires_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.tokens.insert(jti.to_string(), expires_at);
    }

    pub fn revoke_user_before(&self, user_id: &str, cutoff: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let entry = inner.users.entry(user_id.to_string()).or_insert(cutoff);
        if cutoff > *entry {
            *entry = cutoff;
        }
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        let inner = self.inner.lock().expect("mutex poisoned");
        inner
            .tokens
            .get(jti)
            .map(|expires_at| *expires_at > Utc::now())
            .unwrap_or(false)
    }

    pub fn is_user_revoked(&self, user_id: &str, issued_at: DateTime<Utc>) -> bool {
        let inner = self.inner.lock().expect("mutex poisoned");
        inner
            .users
            .get(user_id)
            .map(|cutoff| issued_at <= *cutoff)
            .unwrap_or(false)
    }

    /// Starts the background sweeper. Idempotent per store; call once at
    /// process init.
    pub async fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock().await;
        if slot.is_some() {
            warn!("revocation sweeper already running");
            return;
        }

        let (stop, mut stopped) = watch::channel(false);
        let inner = self.inner.clone();
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval(config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sweep(&inner, config.user_entry_retention);
                        if removed > 0 {
                            debug!(removed, "swept expired revocation entries");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        *slot = Some(Sweeper { stop, task });
    }

    /// Signals the sweeper and waits for it to finish.
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().await.take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.stop.send(true);
            if let Err(err) = sweeper.task.await {
                warn!(?err, "revocation sweeper did not shut down cleanly");
            }
        }
    }

    #[cfg(test)]
    fn entry_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().expect("mutex poisoned");
        (inner.tokens.len(), inner.users.len())
    }
}

fn sweep(inner: &Arc<Mutex<Inner>>, user_retention: Duration) -> usize {
    let now = Utc::now();
    let user_cutoff = now
        - chrono::Duration::from_std(user_retention).unwrap_or_else(|_| chrono::Duration::hours(24));

    let mut inner = inner.lock().expect("mutex poisoned");
    let before = inner.tokens.len() + inner.users.len();
    inner.tokens.retain(|_, expires_at| *expires_at > now);
    inner.users.retain(|_, cutoff| *cutoff > user_cutoff);
    before - (inner.tokens.len() + inner.users.len())
}
