use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::{Error, Result};
use async_trait::async_trait;

/// Result of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    pub value: u64,
    /// Remaining time to live on the key, if it has one.
    pub expires_in: Option<Duration>,
}

/// Low-latency key-value store shared by every worker.
///
/// Implementations must make `increment` and `compare_and_set` atomic with
/// respect to all other callers, including callers in other processes.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), Error>;

    /// Writes `value` only when the current value equals `expected`.
    /// `expected = None` means the key must be absent.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, Error>;

    /// Adds one to the counter at `key`. `ttl_on_create` is applied only when
    /// the increment creates the key, which gives fixed-window semantics.
    async fn increment(&self, key: &str, ttl_on_create: Option<Duration>)
    -> Result<Increment, Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    async fn ping(&self) -> Result<(), Error>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Single-process store guarded by one mutex. Expired keys are dropped lazily.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        f(&mut entries, now)
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.with_entries(|entries, _| entries.get(key).map(|e| e.value.clone())))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), Error> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
        });
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, Error> {
        Ok(self.with_entries(|entries, now| {
            let current = entries.get(key).map(|e| e.value.as_str());
            if current != expected {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|ttl| now + ttl),
                },
            );
            true
        }))
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<Increment, Error> {
        self.with_entries(|entries, now| -> Result<Increment, Error> {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: ttl_on_create.map(|ttl| now + ttl),
            });

            let value = entry.value.parse::<u64>()? + 1;
            entry.value = value.to_string();

            Ok(Increment {
                value,
                expires_in: entry.expires_at.map(|at| at.saturating_duration_since(now)),
            })
        })
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.with_entries(|entries, _| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_keeps_ttl_from_first_write() {
        let store = InMemoryStore::new();

        let first = store
            .increment("k", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let second = store
            .increment("k", Some(Duration::from_secs(600)))
            .await
            .unwrap();

        assert_eq!(first.value, 1);
        assert_eq!(second.value, 2);
        assert!(second.expires_in.unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn expired_keys_disappear() {
        let store = InMemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn compare_and_set_requires_expected_value() {
        let store = InMemoryStore::new();

        assert!(store.compare_and_set("k", None, "a", None).await.unwrap());
        assert!(!store.compare_and_set("k", None, "b", None).await.unwrap());
        assert!(!store.compare_and_set("k", Some("x"), "b", None).await.unwrap());
        assert!(store.compare_and_set("k", Some("a"), "b", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }
}
