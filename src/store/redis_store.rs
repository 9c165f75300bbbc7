use anyhow::{Context, Result};
use log::info;
use redis::aio::ConnectionManager;
use redis::{Cmd, FromRedisValue, Value};
use std::time::Duration;

use crate::dedup::DedupKey;
use crate::store::{ClaimStore, ClaimToken, StoreUnavailable};

/// Claim store on a Redis server, shared by every process that talks to it.
///
/// A claim is one `SET key token NX PX ttl` command, which Redis executes
/// atomically. Expiry is left to Redis.
#[derive(Clone)]
pub struct RedisClaimStore {
    connection: ConnectionManager,
}

impl RedisClaimStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("Invalid redis url {url}"))?;
        let connection = ConnectionManager::new(client)
            .await
            .with_context(|| format!("Failed to connect to redis at {url}"))?;
        info!(url = url; "Connected to redis claim store");
        Ok(Self { connection })
    }
}

fn unavailable(err: redis::RedisError) -> StoreUnavailable {
    StoreUnavailable::new(format!("redis: {err}"))
}

/// `SET key token NX PX ttl_ms`, with the ttl in whole milliseconds.
fn claim_command(key: &DedupKey, token: &ClaimToken, ttl: Duration) -> Cmd {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    let mut cmd = redis::cmd("SET");
    cmd.arg(key.as_str())
        .arg(token.to_string())
        .arg("NX")
        .arg("PX")
        .arg(ttl_ms);
    cmd
}

fn owner_command(key: &DedupKey) -> Cmd {
    let mut cmd = redis::cmd("GET");
    cmd.arg(key.as_str());
    cmd
}

// "OK" when the key was set, nil when NX found it present.
fn claim_reply(reply: &Value) -> Result<bool, StoreUnavailable> {
    match reply {
        Value::Okay => Ok(true),
        Value::SimpleString(status) if status == "OK" => Ok(true),
        Value::Nil => Ok(false),
        other => Err(StoreUnavailable::new(format!(
            "redis: unexpected SET reply {other:?}"
        ))),
    }
}

fn owner_reply(reply: &Value) -> Result<Option<ClaimToken>, StoreUnavailable> {
    let token = Option::<String>::from_redis_value(reply).map_err(unavailable)?;
    Ok(token.as_deref().and_then(ClaimToken::parse))
}

#[rocket::async_trait]
impl ClaimStore for RedisClaimStore {
    async fn claim_if_absent(
        &self,
        key: &DedupKey,
        token: &ClaimToken,
        ttl: Duration,
    ) -> Result<bool, StoreUnavailable> {
        let mut connection = self.connection.clone();
        let reply: Value = claim_command(key, token, ttl)
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        claim_reply(&reply)
    }

    async fn claim_owner(&self, key: &DedupKey) -> Result<Option<ClaimToken>, StoreUnavailable> {
        let mut connection = self.connection.clone();
        let reply: Value = owner_command(key)
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        owner_reply(&reply)
    }
}
