use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-phone serialization. Events for one phone run one at a time; other
/// phones are unaffected. Entries are dropped once nobody holds or waits.
#[derive(Clone, Default)]
pub struct PhoneLocks {
    entries: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

pub struct PhoneGuard {
    phone: String,
    entries: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PhoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, phone: &str) -> PhoneGuard {
        let entry = {
            let mut entries = lock_entries(&self.entries);
            entries
                .entry(phone.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = entry.lock_owned().await;
        PhoneGuard {
            phone: phone.to_string(),
            entries: self.entries.clone(),
            guard: Some(guard),
        }
    }

    /// Number of phones with a live lock entry.
    pub fn tracked(&self) -> usize {
        lock_entries(&self.entries).len()
    }
}

impl Drop for PhoneGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut entries = lock_entries(&self.entries);
        if entries
            .get(&self.phone)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            entries.remove(&self.phone);
        }
    }
}

fn lock_entries(
    entries: &Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    match entries.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::PhoneLocks;

    #[tokio::test]
    async fn same_phone_is_serialized() {
        let locks = PhoneLocks::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.lock("1").await;
        let waiter = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("1").await;
                order.lock().await.push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("first");
        drop(first);
        waiter.await.expect("waiter should finish");

        assert_eq!(*order.lock().await, vec!["first", "second"]);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn different_phones_do_not_block() {
        let locks = PhoneLocks::new();
        let _first = locks.lock("1").await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock("2")).await;
        assert!(second.is_ok());
        assert_eq!(locks.tracked(), 2);
    }
}
