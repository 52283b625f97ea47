use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use tracing::info;

use crate::clients::store::{Increment, SharedStore};

const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[2] == '1' then
    if current ~= ARGV[1] then return 0 end
elseif current then
    return 0
end
local ttl = tonumber(ARGV[4])
if ttl > 0 then
    redis.call('SET', KEYS[1], ARGV[3], 'PX', ttl)
else
    redis.call('SET', KEYS[1], ARGV[3])
end
return 1
"#;

const INCREMENT: &str = r#"
local value = redis.call('INCR', KEYS[1])
local ttl = tonumber(ARGV[1])
if value == 1 and ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return {value, redis.call('PTTL', KEYS[1])}
"#;

/// `SharedStore` backed by Redis. Atomic operations run as Lua scripts so the
/// read and the write happen in one server-side step.
pub struct RedisStore {
    connection: MultiplexedConnection,
    compare_and_set: Script,
    increment: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            compare_and_set: Script::new(COMPARE_AND_SET),
            increment: Script::new(INCREMENT),
        })
    }
}

fn ttl_millis(ttl: Option<Duration>) -> u64 {
    ttl.map(|ttl| ttl.as_millis().max(1) as u64).unwrap_or(0)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| anyhow!("Failed to get '{}': {}", key, e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        let result = match ttl {
            Some(_) => conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl)).await,
            None => conn.set::<_, _, ()>(key, value).await,
        };
        result.map_err(|e| anyhow!("Failed to set '{}': {}", key, e))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, Error> {
        let mut conn = self.connection.clone();
        let mut invocation = self.compare_and_set.prepare_invoke();
        invocation
            .key(key)
            .arg(expected.unwrap_or(""))
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(value)
            .arg(ttl_millis(ttl));

        let swapped: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Compare-and-set on '{}' failed: {}", key, e))?;

        Ok(swapped == 1)
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<Increment, Error> {
        let mut conn = self.connection.clone();
        let mut invocation = self.increment.prepare_invoke();
        invocation.key(key).arg(ttl_millis(ttl_on_create));

        let (value, pttl): (i64, i64) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Increment on '{}' failed: {}", key, e))?;

        Ok(Increment {
            value: value.max(0) as u64,
            expires_in: (pttl > 0).then(|| Duration::from_millis(pttl as u64)),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| anyhow!("Failed to delete '{}': {}", key, e))
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.ping::<String>()
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;
        Ok(())
    }
}
