use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::{KvFuture, TtlStore};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local TTL store. Uses tokio's clock so paused test time applies.
#[derive(Clone, Default)]
pub struct MemoryTtlStore {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock_entries()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn write(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut entries = self.lock_entries();
        entries.retain(|_, entry| entry.expires_at > Instant::now());
        entries.insert(key.to_string(), MemoryEntry { value, expires_at });
    }

    fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock_entries()
            .remove(key)
            .is_some_and(|entry| entry.expires_at > now)
    }
}

impl TtlStore for MemoryTtlStore {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.read(key)) })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> KvFuture<'a, ()> {
        Box::pin(async move {
            self.write(key, value, ttl);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> KvFuture<'a, bool> {
        Box::pin(async move { Ok(self.remove(key)) })
    }
}
