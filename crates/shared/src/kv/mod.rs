use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::config::SessionBackend;

mod memory;
mod redis_store;

pub use memory::MemoryTtlStore;
pub use redis_store::RedisTtlStore;

pub type KvFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, KvError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to connect to key/value store: {0}")]
    Connect(String),
}

/// String key/value storage where every write carries an expiry.
pub trait TtlStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>>;
    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> KvFuture<'a, ()>;
    fn delete<'a>(&'a self, key: &'a str) -> KvFuture<'a, bool>;
}

/// Opens the configured store. An unreachable Redis is an error unless the
/// backend opts into the in-memory fallback.
pub async fn connect_ttl_store(backend: &SessionBackend) -> Result<Arc<dyn TtlStore>, KvError> {
    match backend {
        SessionBackend::Redis {
            url,
            fallback_to_memory,
        } => match RedisTtlStore::connect(url).await {
            Ok(store) => Ok(Arc::new(store)),
            Err(err) if *fallback_to_memory => {
                warn!("redis unavailable, sessions fall back to process memory: {err}");
                Ok(Arc::new(MemoryTtlStore::new()))
            }
            Err(err) => Err(err),
        },
        SessionBackend::Memory => Ok(Arc::new(MemoryTtlStore::new())),
    }
}

pub(crate) fn compose_key(prefix: &str, scope: &str, suffix: &str) -> String {
    format!("{prefix}:{scope}:{suffix}")
}

pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
