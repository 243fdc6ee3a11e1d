use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};

use super::cache::{KeyValueCache, RevocationStore, revocation_key};

/// Redis-backed permission cache and revocation set.
#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl KeyValueCache for RedisService {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[async_trait]
impl RevocationStore for RedisService {
    /// `SET NX EX`: the entry lives exactly as long as the token could still verify.
    async fn revoke(&self, token_id: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(revocation_key(token_id))
            .arg("revoked")
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to revoke token: {}", e))?;

        Ok(reply.is_some())
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(revocation_key(token_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check revocation: {}", e))?;

        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_revoke_round_trip() {
        let service = RedisService::new(&RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        })
        .await
        .unwrap();

        let token_id = uuid::Uuid::new_v4().simple().to_string();
        assert!(!service.is_revoked(&token_id).await.unwrap());
        assert!(service.revoke(&token_id, 30).await.unwrap());
        assert!(!service.revoke(&token_id, 30).await.unwrap());
        assert!(service.is_revoked(&token_id).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_cache_set_get_delete() {
        let service = RedisService::new(&RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        })
        .await
        .unwrap();

        let key = format!("user_permissions:{}", uuid::Uuid::new_v4());
        service.set(&key, "[\"accounts.view\"]", 60).await.unwrap();
        assert_eq!(
            service.get(&key).await.unwrap().as_deref(),
            Some("[\"accounts.view\"]")
        );
        service.delete(&key).await.unwrap();
        assert_eq!(service.get(&key).await.unwrap(), None);
    }
}
