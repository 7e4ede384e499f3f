//! Redis-backed visibility-timeout queue.
//!
//! ## Layout
//!
//! For a queue named `q`:
//!
//! - `courier:queue:q:visible`: sorted set of message ids scored by the epoch
//!   millisecond at which each becomes visible
//! - `courier:queue:q:msg:<id>`: hash with `body`, `dequeue_count`,
//!   `inserted_at` and `expires_at` (epoch ms, `0` for no TTL)
//!
//! Leasing is a single Lua script: pick the lowest visible id, drop it if its
//! TTL has passed, otherwise bump its dequeue count and push its visibility out
//! by the lease. Message hashes also carry a Redis `PEXPIRE`, so orphans left
//! by a crash disappear on their own; the script skips ids whose hash is gone.
//!
//! Keys are built inside the script, so a queue must live on one Redis node.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::instrument;
use uuid::Uuid;

use courier_events::{QueueError, QueueSink, QueueSource, ReceivedMessage};

const KEY_PREFIX: &str = "courier:queue";

const LEASE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local lease = tonumber(ARGV[2])
local prefix = ARGV[3]

while true do
  local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', now, 'LIMIT', 0, 1)
  if #ids == 0 then
    return false
  end

  local id = ids[1]
  local key = prefix .. id
  local expires = tonumber(redis.call('HGET', key, 'expires_at') or '0')

  if redis.call('EXISTS', key) == 0 then
    redis.call('ZREM', KEYS[1], id)
  elseif expires > 0 and expires <= now then
    redis.call('DEL', key)
    redis.call('ZREM', KEYS[1], id)
  else
    local count = redis.call('HINCRBY', key, 'dequeue_count', 1)
    redis.call('ZADD', KEYS[1], now + lease, id)
    return {id, redis.call('HGET', key, 'body'), count, redis.call('HGET', key, 'inserted_at')}
  end
end
"#;

pub struct RedisQueue {
    name: String,
    visible_key: String,
    message_prefix: String,
    conn: MultiplexedConnection,
    lease_script: Script,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, name: impl Into<String>) -> Result<Self, QueueError> {
        let name = name.into();
        let connect_error = |e: redis::RedisError| QueueError::Connect {
            queue: name.clone(),
            message: e.to_string(),
        };
        let client = redis::Client::open(redis_url).map_err(connect_error)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(connect_error)?;

        Ok(Self::with_connection(conn, name))
    }

    /// Share one multiplexed connection between several queues.
    pub fn with_connection(conn: MultiplexedConnection, name: impl Into<String>) -> Self {
        let name = name.into();
        let (visible_key, message_prefix) = keys(&name);
        Self {
            name,
            visible_key,
            message_prefix,
            conn,
            lease_script: Script::new(LEASE_SCRIPT),
        }
    }

    fn message_key(&self, id: &str) -> String {
        format!("{}{id}", self.message_prefix)
    }

    fn send_error(&self, err: redis::RedisError) -> QueueError {
        QueueError::Send {
            queue: self.name.clone(),
            message: err.to_string(),
        }
    }

    fn receive_error(&self, err: impl core::fmt::Display) -> QueueError {
        QueueError::Receive {
            queue: self.name.clone(),
            message: err.to_string(),
        }
    }


}

fn keys(name: &str) -> (String, String) {
    (
        format!("{KEY_PREFIX}:{name}:visible"),
        format!("{KEY_PREFIX}:{name}:msg:"),
    )
}

fn delete_error(queue: &str, err: redis::RedisError) -> QueueError {
    QueueError::Delete {
        queue: queue.to_string(),
        message: err.to_string(),
    }
}

fn release_error(queue: &str, err: redis::RedisError) -> QueueError {
    QueueError::Release {
        queue: queue.to_string(),
        message: err.to_string(),
    }
}

fn epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl QueueSink for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, message), fields(queue = %self.name), err(Display))]
    async fn send(
        &self,
        message: String,
        visibility_timeout: Option<Duration>,
        time_to_live: Option<Duration>,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        let now_ms = epoch_ms(now);
        let id = Uuid::now_v7().to_string();
        let key = self.message_key(&id);
        let visible_at = now_ms + visibility_timeout.map(duration_ms).unwrap_or(0);
        let expires_at = time_to_live.map(|ttl| now_ms + duration_ms(ttl)).unwrap_or(0);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &key,
                &[
                    ("body", message),
                    ("dequeue_count", "0".to_string()),
                    ("inserted_at", now.to_rfc3339()),
                    ("expires_at", expires_at.to_string()),
                ],
            )
            .ignore();
        if let Some(ttl) = time_to_live {
            pipe.pexpire(&key, duration_ms(ttl)).ignore();
        }
        pipe.zadd(&self.visible_key, &id, visible_at).ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| self.send_error(e))
    }
}

#[async_trait]
impl QueueSource for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, lease: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        let mut conn = self.conn.clone();
        let leased: Option<(String, String, u32, String)> = self
            .lease_script
            .key(&self.visible_key)
            .arg(epoch_ms(Utc::now()))
            .arg(duration_ms(lease))
            .arg(&self.message_prefix)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.receive_error(e))?;

        let Some((id, body, dequeue_count, inserted_at)) = leased else {
            return Ok(None);
        };

        let inserted_at = DateTime::parse_from_rfc3339(&inserted_at)
            .map_err(|e| self.receive_error(e))?
            .with_timezone(&Utc);

        Ok(Some(ReceivedMessage {
            id,
            body,
            dequeue_count,
            inserted_at,
        }))
    }

    async fn delete(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let (_, removed): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.message_key(id))
            .zrem(&self.visible_key, id)
            .query_async(&mut conn)
            .await
            .map_err(|e| delete_error(&self.name, e))?;

        if removed == 0 {
            return Err(QueueError::NotFound {
                queue: self.name.clone(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn release(&self, id: &str, visibility_timeout: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = conn
            .zscore(&self.visible_key, id)
            .await
            .map_err(|e| release_error(&self.name, e))?;
        if score.is_none() {
            return Err(QueueError::NotFound {
                queue: self.name.clone(),
                id: id.to_string(),
            });
        }

        let visible_at = epoch_ms(Utc::now()) + duration_ms(visibility_timeout);
        redis::cmd("ZADD")
            .arg(&self.visible_key)
            .arg("XX")
            .arg(visible_at)
            .arg(id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| release_error(&self.name, e))
    }
}
