use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{KvError, KvFuture, TtlStore, ttl_seconds};

#[derive(Clone)]
pub struct RedisTtlStore {
    connection: ConnectionManager,
}

impl RedisTtlStore {
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut health_connection = connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut health_connection)
            .await
            .map_err(|err| KvError::Connect(format!("redis ping failed: {err}")))?;

        Ok(Self { connection })
    }
}

impl TtlStore for RedisTtlStore {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let value: Option<String> = connection.get(key).await?;
            Ok(value)
        })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> KvFuture<'a, ()> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            connection
                .set_ex::<_, _, ()>(key, value, ttl_seconds(ttl))
                .await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> KvFuture<'a, bool> {
        Box::pin(async move {
            let mut connection = self.connection.clone();
            let removed: i64 = connection.del(key).await?;
            Ok(removed > 0)
        })
    }
}
