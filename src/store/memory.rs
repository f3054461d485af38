//! In-memory reference store.
//!
//! A single mutex over a `HashMap` makes every operation atomic, which is
//! exactly the guarantee a distributed backend must provide with scripts or
//! compare-and-swap. TTLs are evaluated lazily against an injected
//! [`Clock`], so tests can step time instead of sleeping.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};
use crate::store::{CounterStore, StoreError, TokenGrant};

#[derive(Debug, Clone)]
enum Value {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Absolute expiry on the store's clock; `None` = no expiry.
    expires_at_millis: Option<u64>,
}

/// Single-process [`CounterStore`] backed by a mutex-guarded map.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }

    /// Build a store on an explicit clock. Pair with
    /// [`crate::clock::ManualClock`] to exercise TTL expiry deterministically.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// Number of live keys, for tests and diagnostics.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        let guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        guard.values().filter(|e| !expired(e, now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned mutex only means another thread panicked mid-operation;
        // the map itself is still coherent for counter purposes.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn expired(entry: &Entry, now_millis: u64) -> bool {
    matches!(entry.expires_at_millis, Some(at) if at <= now_millis)
}

fn remaining_ttl(entry: &Entry, now_millis: u64) -> Option<Duration> {
    entry.expires_at_millis.map(|at| Duration::from_millis(at.saturating_sub(now_millis)))
}

fn as_int(entry: &Entry) -> i64 {
    match &entry.value {
        Value::Int(n) => *n,
        Value::Text(_) => 0,
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn take_token(
        &self,
        key: &str,
        capacity: i64,
        window: Duration,
    ) -> Result<TokenGrant, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();

        let live = guard.get(key).filter(|e| !expired(e, now)).cloned();
        match live {
            None => {
                // First caller fills the bucket and takes one token.
                let tokens = capacity.saturating_sub(1).max(0);
                guard.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Int(tokens),
                        expires_at_millis: Some(now + window.as_millis() as u64),
                    },
                );
                Ok(TokenGrant { allowed: true, remaining: tokens, reset_after: window })
            }
            Some(entry) => {
                let tokens = as_int(&entry);
                let reset_after = remaining_ttl(&entry, now).unwrap_or(window);
                if tokens > 0 {
                    guard.insert(
                        key.to_string(),
                        Entry { value: Value::Int(tokens - 1), ..entry },
                    );
                    Ok(TokenGrant { allowed: true, remaining: tokens - 1, reset_after })
                } else {
                    Ok(TokenGrant { allowed: false, remaining: 0, reset_after })
                }
            }
        }
    }

    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        let current = guard.get(key).filter(|e| !expired(e, now)).map(as_int).unwrap_or(0);
        let next = current.saturating_add(1);
        guard.insert(
            key.to_string(),
            Entry {
                value: Value::Int(next),
                expires_at_millis: Some(now + ttl.as_millis() as u64),
            },
        );
        Ok(next)
    }

    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        match guard.get(key).filter(|e| !expired(e, now)).cloned() {
            Some(entry) => {
                let next = as_int(&entry).saturating_add(1);
                guard.insert(key.to_string(), Entry { value: Value::Int(next), ..entry });
                Ok(next)
            }
            None => {
                guard.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Int(1),
                        expires_at_millis: Some(now + ttl.as_millis() as u64),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = self.clock.now_millis();
        let guard = self.lock();
        Ok(guard.get(key).filter(|e| !expired(e, now)).map(as_int))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        guard.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value),
                expires_at_millis: ttl.map(|t| now + t.as_millis() as u64),
            },
        );
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_millis();
        let guard = self.lock();
        Ok(guard.get(key).filter(|e| !expired(e, now)).map(|e| match &e.value {
            Value::Text(s) => s.clone(),
            Value::Int(n) => n.to_string(),
        }))
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        match guard.remove(key) {
            Some(entry) => Ok(!expired(&entry, now)),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let guard = self.lock();
        Ok(guard.get(key).is_some_and(|e| !expired(e, now)))
    }

    async fn ttl_of(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now_millis();
        let guard = self.lock();
        Ok(guard.get(key).filter(|e| !expired(e, now)).and_then(|e| remaining_ttl(e, now)))
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        let guard = self.lock();
        Ok(guard
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !expired(e, now))
            .count() as u64)
    }
}
