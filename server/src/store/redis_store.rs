use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::time::Duration;

use super::{StoreError, StoreResult, StoredTokenRecord, TokenStore};

/// Token store shared between server instances. Records are JSON strings;
/// TTLs map to `SET .. EX`, `take` to `GETDEL`, `insert_if_absent` to
/// `SET .. NX` and `replace` to `SET .. GET`. Needs Redis 6.2 or newer.
#[derive(Clone)]
pub struct RedisTokenStore {
    pool: Pool,
}

impl RedisTokenStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn decode(key: &str, raw: Option<String>) -> StoreResult<Option<StoredTokenRecord>> {
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }
}

// DEL only while the value is byte-for-byte the expected record
const DELETE_IF_EQ_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// EX 0 is rejected by Redis; round up to the smallest valid TTL.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Builds a pool and checks one connection out so a bad URL fails at startup.
pub async fn connect_redis_pool(
    url: &str,
    pool_size: usize,
    timeout: Duration,
) -> StoreResult<Pool> {
    let mut redis_config = deadpool_redis::Config::from_url(url);
    if let Some(ref mut pool_config) = redis_config.pool {
        pool_config.max_size = pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
    } else {
        let mut pool_config = deadpool_redis::PoolConfig::new(pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        redis_config.pool = Some(pool_config);
    }

    let pool = redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    let _conn = pool.get().await?;
    log::info!("Connected to Redis token store at {}", url);
    Ok(pool)
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, key: &str) -> StoreResult<Option<StoredTokenRecord>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;
        Self::decode(key, raw)
    }

    async fn set(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.pool.get().await?;

        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, payload, ttl_secs(ttl)).await?;
            }
            None => conn.set::<_, _, ()>(key, payload).await?,
        }

        log::debug!("Stored token record {}", key);
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.pool.get().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }

        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn replace(
        &self,
        key: &str,
        record: &StoredTokenRecord,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<StoredTokenRecord>> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.pool.get().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        cmd.arg("GET");

        let previous: Option<String> = cmd.query_async(&mut conn).await?;
        Self::decode(key, previous)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &StoredTokenRecord) -> StoreResult<bool> {
        let payload = serde_json::to_string(expected)?;
        let mut conn = self.pool.get().await?;

        let removed: i64 = redis::Script::new(DELETE_IF_EQ_SCRIPT)
            .key(key)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &str) -> StoreResult<Option<StoredTokenRecord>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Self::decode(key, raw)
    }
}
