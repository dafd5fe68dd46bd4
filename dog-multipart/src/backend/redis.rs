use std::time::Duration;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::{backend::RegistryBackend, MultipartError, MultipartResult};

const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const EXTEND_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Redis backend: lists for part records, `SET NX PX` for leases
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    delete_if_equals: Script,
    extend_if_equals: Script,
}

impl RedisBackend {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> MultipartResult<Self> {
        let client = redis::Client::open(url).map_err(MultipartError::registry)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(MultipartError::registry)?;
        Ok(Self::with_connection(connection))
    }

    /// Connect using the `REDIS_URL` environment variable
    pub async fn from_env() -> MultipartResult<Self> {
        let url = std::env::var("REDIS_URL")
            .map_err(|_| MultipartError::invalid("REDIS_URL environment variable required"))?;
        Self::connect(&url).await
    }

    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            delete_if_equals: Script::new(DELETE_IF_EQUALS),
            extend_if_equals: Script::new(EXTEND_IF_EQUALS),
        }
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        // PEXPIRE 0 deletes the key outright
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

#[async_trait]
impl RegistryBackend for RedisBackend {
    async fn append_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> MultipartResult<()> {
        let mut connection = self.connection.clone();
        let (): () = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(Self::ttl_millis(ttl))
            .ignore()
            .query_async(&mut connection)
            .await
            .map_err(MultipartError::registry)?;
        Ok(())
    }

    async fn range_all(&self, key: &str) -> MultipartResult<Vec<String>> {
        let mut connection = self.connection.clone();
        let values: Vec<String> = connection
            .lrange(key, 0, -1)
            .await
            .map_err(MultipartError::registry)?;
        Ok(values)
    }

    async fn delete(&self, key: &str) -> MultipartResult<()> {
        let mut connection = self.connection.clone();
        let _removed: i64 = connection.del(key).await.map_err(MultipartError::registry)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> MultipartResult<bool> {
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(Self::ttl_millis(ttl))
            .query_async(&mut connection)
            .await
            .map_err(MultipartError::registry)?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> MultipartResult<bool> {
        let mut connection = self.connection.clone();
        let removed: i64 = self
            .delete_if_equals
            .key(key)
            .arg(value)
            .invoke_async(&mut connection)
            .await
            .map_err(MultipartError::registry)?;
        Ok(removed > 0)
    }

    async fn extend_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> MultipartResult<bool> {
        let mut connection = self.connection.clone();
        let extended: i64 = self
            .extend_if_equals
            .key(key)
            .arg(value)
            .arg(Self::ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(MultipartError::registry)?;
        Ok(extended > 0)
    }
}
