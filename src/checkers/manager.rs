use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, error};

use super::ServiceChecker;
use crate::types::{CheckResult, ServiceStatuses};

struct CacheEntry {
    result: CheckResult,
    stored: Instant,
}

/// Runs a fixed set of checkers against one address at a time.
///
/// Completed results are cached per (checker, address) for `cache_ttl`;
/// a zero TTL disables caching.
pub struct ServiceCheckManager {
    checkers: Vec<Arc<dyn ServiceChecker>>,
    cache_ttl: Duration,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl ServiceCheckManager {
    pub fn new(checkers: Vec<Arc<dyn ServiceChecker>>) -> Self {
        Self {
            checkers,
            cache_ttl: Duration::ZERO,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Run every checker against `address` concurrently.
    ///
    /// The returned map has exactly one entry per checker name. A checker
    /// that panics, errors or outlives `per_checker_timeout` is reported
    /// unavailable without affecting its siblings; checkers still running
    /// when `overall_timeout` elapses are reported as `timeout` and the call
    /// returns right away.
    pub async fn run_all(
        &self,
        address: &str,
        per_checker_timeout: Duration,
        overall_timeout: Duration,
    ) -> ServiceStatuses {
        let deadline = Instant::now() + overall_timeout;
        let mut results = ServiceStatuses::new();
        let mut pending: Vec<String> = Vec::new();
        let mut set = JoinSet::new();

        for checker in &self.checkers {
            let name = checker.name().to_string();
            if results.contains_key(&name) || pending.contains(&name) {
                continue;
            }
            if let Some(hit) = self.cached(&name, address).await {
                results.insert(name, hit);
                continue;
            }
            pending.push(name.clone());

            let checker = Arc::clone(checker);
            let address = address.to_string();
            set.spawn(async move {
                let probe = time::timeout(per_checker_timeout, checker.check(&address, per_checker_timeout));
                let result = match AssertUnwindSafe(probe).catch_unwind().await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => CheckResult::timeout(),
                    Err(panic) => {
                        let msg = panic_message(panic.as_ref());
                        error!(checker = %name, address, "service checker panicked: {msg}");
                        CheckResult::unavailable(format!("checker failed: {msg}"))
                    }
                };
                (name, result)
            });
        }

        let mut deadline_hit = false;
        loop {
            match time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((name, result)))) => {
                    self.store(&name, address, &result).await;
                    results.insert(name, result);
                }
                Ok(Some(Err(e))) => error!(address, error = %e, "service check task failed"),
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    set.abort_all();
                    break;
                }
            }
        }

        for name in pending {
            results.entry(name).or_insert_with(|| {
                if deadline_hit {
                    CheckResult::timeout()
                } else {
                    CheckResult::unavailable("checker task failed")
                }
            });
        }
        if deadline_hit {
            debug!(address, "service checks cut off by overall timeout");
        }
        results
    }

    /// Drop every cached result for `address`.
    pub async fn forget(&self, address: &str) {
        self.cache.lock().await.retain(|(_, addr), _| addr != address);
    }

    async fn cached(&self, name: &str, address: &str) -> Option<CheckResult> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let cache = self.cache.lock().await;
        cache
            .get(&(name.to_string(), address.to_string()))
            .filter(|e| e.stored.elapsed() < self.cache_ttl)
            .map(|e| e.result.clone())
    }

    async fn store(&self, name: &str, address: &str, result: &CheckResult) {
        if self.cache_ttl.is_zero() {
            return;
        }
        let mut cache = self.cache.lock().await;
        cache.retain(|_, e| e.stored.elapsed() < self.cache_ttl);
        cache.insert(
            (name.to_string(), address.to_string()),
            CacheEntry {
                result: result.clone(),
                stored: Instant::now(),
            },
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Up,
        Down,
        Panic,
        Hang,
    }

    struct Fake {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl Fake {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ServiceChecker for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn port(&self) -> u16 {
            0
        }

        async fn check(&self, _address: &str, _timeout: Duration) -> CheckResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Up => CheckResult::available(Map::new()),
                Behavior::Down => CheckResult::unavailable("refused"),
                Behavior::Panic => panic!("malformed reply"),
                Behavior::Hang => {
                    time::sleep(Duration::from_secs(30)).await;
                    CheckResult::available(Map::new())
                }
            }
        }
    }

    #[tokio::test]
    async fn one_entry_per_checker_even_when_one_panics() {
        let manager = ServiceCheckManager::new(vec![
            Fake::new("up", Behavior::Up),
            Fake::new("down", Behavior::Down),
            Fake::new("boom", Behavior::Panic),
        ]);
        let res = manager
            .run_all("127.0.0.1", Duration::from_secs(1), Duration::from_secs(2))
            .await;
        assert_eq!(res.len(), 3);
        assert!(res["up"].available);
        assert_eq!(res["down"].error.as_deref(), Some("refused"));
        assert!(!res["boom"].available);
        assert!(res["boom"].error.as_deref().unwrap().contains("malformed reply"));
    }

    #[tokio::test]
    async fn per_checker_timeout_marks_only_the_slow_one() {
        let manager = ServiceCheckManager::new(vec![
            Fake::new("up", Behavior::Up),
            Fake::new("slow", Behavior::Hang),
        ]);
        let res = manager
            .run_all("127.0.0.1", Duration::from_millis(100), Duration::from_secs(5))
            .await;
        assert!(res["up"].available);
        assert_eq!(res["slow"], CheckResult::timeout());
    }

    #[tokio::test]
    async fn overall_timeout_returns_promptly() {
        let manager = ServiceCheckManager::new(vec![
            Fake::new("up", Behavior::Up),
            Fake::new("slow", Behavior::Hang),
        ]);
        let start = Instant::now();
        let res = manager
            .run_all("127.0.0.1", Duration::from_secs(30), Duration::from_millis(150))
            .await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(res.len(), 2);
        assert!(res["up"].available);
        assert_eq!(res["slow"].error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn cache_skips_repeat_checks_within_ttl() {
        let up = Fake::new("up", Behavior::Up);
        let manager = ServiceCheckManager::new(vec![up.clone() as Arc<dyn ServiceChecker>])
            .with_cache_ttl(Duration::from_secs(60));
        let t = Duration::from_secs(1);
        manager.run_all("10.0.0.1", t, t).await;
        manager.run_all("10.0.0.1", t, t).await;
        assert_eq!(up.calls.load(Ordering::SeqCst), 1);

        // Different address is a different cache key.
        manager.run_all("10.0.0.2", t, t).await;
        assert_eq!(up.calls.load(Ordering::SeqCst), 2);

        manager.forget("10.0.0.1").await;
        manager.run_all("10.0.0.1", t, t).await;
        manager.run_all("10.0.0.2", t, t).await;
        assert_eq!(up.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_store() {
        let up = Fake::new("up", Behavior::Up);
        let manager = ServiceCheckManager::new(vec![up.clone() as Arc<dyn ServiceChecker>])
            .with_cache_ttl(Duration::from_millis(50));
        let t = Duration::from_secs(1);
        for last in 1..=20 {
            manager.run_all(&format!("10.0.0.{last}"), t, t).await;
        }
        assert!(manager.cache.lock().await.len() > 1);

        time::sleep(Duration::from_millis(80)).await;
        manager.run_all("10.0.1.1", t, t).await;
        let cache = manager.cache.lock().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&("up".to_string(), "10.0.1.1".to_string())));
    }

    #[tokio::test]
    async fn no_checkers_no_entries() {
        let manager = ServiceCheckManager::new(Vec::new());
        let t = Duration::from_millis(10);
        assert!(manager.run_all("10.0.0.1", t, t).await.is_empty());
    }
}
