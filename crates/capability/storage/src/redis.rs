//! Redis 路由查询与结果缓存实现

use crate::error::StorageError;
use crate::traits::{ResultCache, RoutingLookup};
use redis::AsyncCommands;

/// Redis 设备路由查询
///
/// 键为设备标识，值为显式配置的目标库名；键不存在表示未配置。
pub struct RedisRoutingLookup {
    client: redis::Client,
}

impl RedisRoutingLookup {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| StorageError::new(err.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait::async_trait]
impl RoutingLookup for RedisRoutingLookup {
    async fn destination_for(&self, device_id: &str) -> Result<Option<String>, StorageError> {
        let mut connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        let destination: Option<String> = connection
            .get(device_id)
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        Ok(destination.filter(|value| !value.is_empty()))
    }
}

/// Redis 命令结果缓存
pub struct RedisResultCache {
    client: redis::Client,
}

impl RedisResultCache {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| StorageError::new(err.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait::async_trait]
impl ResultCache for RedisResultCache {
    async fn store(
        &self,
        correlation_id: &str,
        body: &str,
        ttl_seconds: u64,
    ) -> Result<(), StorageError> {
        let mut connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        connection
            .set_ex::<_, _, ()>(correlation_id, body, ttl_seconds)
            .await
            .map_err(|err| StorageError::new(err.to_string()))?;
        Ok(())
    }
}
