//! Lock manager owned by the coordinating process
//!
//! Wraps the ledger with the asynchronous, bounded-retry `acquire`. Workers
//! never hold a `LockManager`; they reach the coordinator's instance through
//! the lock protocol.

use super::ledger::LockLedger;
use super::types::{LockConfig, LockEntry, LockError, LockResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LockManager {
    /// Configuration
    config: LockConfig,

    /// The ledger; the mutex is held only for a single try/release
    ledger: Arc<Mutex<LockLedger>>,
}

impl LockManager {
    /// Create a new lock manager with the given configuration
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            ledger: Arc::new(Mutex::new(LockLedger::new())),
        }
    }

    /// Create a lock manager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Single non-blocking attempt
    pub async fn try_acquire(&self, key: &str, holder: &str) -> bool {
        self.ledger.lock().await.try_acquire(key, holder)
    }

    /// Acquire `key` for `holder`, retrying with a fixed backoff.
    ///
    /// Makes at most `max_attempts` attempts in total and fails with
    /// [`LockError::Busy`] once they are exhausted.
    pub async fn acquire(&self, key: &str, holder: &str, max_attempts: u32) -> LockResult<()> {
        if max_attempts < 1 {
            return Err(LockError::InvalidArgument(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }

        let start = Instant::now();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                sleep(self.config.retry_interval).await;
            }

            if self.try_acquire(key, holder).await {
                debug!(
                    lock_key = %key,
                    holder = %holder,
                    attempt,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Lock acquired"
                );
                return Ok(());
            }

            debug!(lock_key = %key, holder = %holder, attempt, "Lock contention");
        }

        warn!(
            lock_key = %key,
            holder = %holder,
            attempts = max_attempts,
            "Lock still busy after all attempts"
        );
        Err(LockError::Busy {
            key: key.to_string(),
        })
    }

    /// Release `key` if `holder` owns it
    pub async fn release(&self, key: &str, holder: &str) -> bool {
        let released = self.ledger.lock().await.release(key, holder);
        if !released {
            debug!(lock_key = %key, holder = %holder, "Release ignored (not the holder)");
        }
        released
    }

    /// Drop every lock owned by `holder` (a worker that disconnected)
    pub async fn release_all(&self, holder: &str) -> usize {
        let mut ledger = self.ledger.lock().await;
        let keys: Vec<String> = ledger
            .entries()
            .into_iter()
            .filter(|entry| entry.holder == holder)
            .map(|entry| entry.key)
            .collect();

        for key in &keys {
            ledger.release(key, holder);
        }

        if !keys.is_empty() {
            info!(holder = %holder, count = keys.len(), "Released locks of departed holder");
        }
        keys.len()
    }

    /// List all held locks
    pub async fn list_active_locks(&self) -> Vec<LockEntry> {
        self.ledger.lock().await.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn create_test_manager() -> LockManager {
        LockManager::new(LockConfig::default().with_retry_interval(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let manager = create_test_manager();

        manager
            .acquire("dom/p1/project.inf", "100", 1)
            .await
            .expect("Failed to acquire lock");
        assert_eq!(manager.list_active_locks().await.len(), 1);

        assert!(manager.release("dom/p1/project.inf", "100").await);
        assert!(manager.list_active_locks().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_attempts_is_invalid() {
        let manager = create_test_manager();
        let err = manager.acquire("k", "100", 0).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));
        assert!(manager.list_active_locks().await.is_empty());
    }

    #[tokio::test]
    async fn test_back_to_back_single_attempt_is_busy() {
        let manager = create_test_manager();

        manager.acquire("p1/project.inf", "holder-a", 1).await.unwrap();
        let err = manager
            .acquire("p1/project.inf", "holder-b", 1)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LockError::Busy {
                key: "p1/project.inf".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_after_all_attempts_uses_backoff() {
        let manager = create_test_manager();
        manager.acquire("k", "holder-a", 1).await.unwrap();

        let start = Instant::now();
        let err = manager.acquire("k", "holder-b", 3).await.unwrap_err();

        assert!(matches!(err, LockError::Busy { .. }));
        // two backoff intervals between three attempts
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_succeeds_after_release() {
        let manager = create_test_manager();
        manager.acquire("k", "holder-a", 1).await.unwrap();

        let releaser = manager.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            releaser.release("k", "holder-a").await;
        });

        let start = Instant::now();
        manager.acquire("k", "holder-b", 3).await.expect("should acquire after release");
        assert!(start.elapsed() >= Duration::from_secs(2));

        let locks = manager.list_active_locks().await;
        assert_eq!(locks[0].holder, "holder-b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_exactly_one_wins_immediately() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let manager = create_test_manager();

        let mut immediate = 0;
        for holder in 0..8 {
            if manager.try_acquire("shared", &holder.to_string()).await {
                immediate += 1;
            }
        }
        assert_eq!(immediate, 1);

        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for holder in 1..4 {
            let m = manager.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let holder = holder.to_string();
                m.acquire("shared", &holder, 30).await?;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(200)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                m.release("shared", &holder).await;
                Ok::<_, LockError>(holder)
            }));
        }

        sleep(Duration::from_millis(500)).await;
        assert!(manager.release("shared", "0").await);

        let mut winners = Vec::new();
        for handle in handles {
            winners.push(handle.await.unwrap().expect("waiter should eventually acquire"));
        }

        winners.sort();
        assert_eq!(winners, vec!["1", "2", "3"]);
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(manager.list_active_locks().await.is_empty());
    }

    #[tokio::test]
    async fn test_release_all_for_holder() {
        let manager = create_test_manager();
        manager.acquire("a", "w1", 1).await.unwrap();
        manager.acquire("b", "w1", 1).await.unwrap();
        manager.acquire("c", "w2", 1).await.unwrap();

        assert_eq!(manager.release_all("w1").await, 2);
        let remaining = manager.list_active_locks().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "c");
    }
}
