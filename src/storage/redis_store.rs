//! Redis expiring store
//!
//! Each record lives under `{prefix}{job_id}` and is written with
//! `SET key value EX ttl`, so every write restarts the key's expiry.
//! Every command is bounded by a response timeout; an unresponsive server
//! surfaces as [`StoreError::Unavailable`] instead of a stalled writer.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::{ExpiringBackend, JobPattern};
use crate::errors::{StoreError, StoreResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Await a redis command, giving up after `limit`
async fn bounded<T, F>(limit: Duration, command: &str, fut: F) -> StoreResult<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::unavailable(format!(
            "redis {command} timed out after {limit:?}"
        ))),
    }
}

#[derive(Clone)]
pub struct RedisExpiringStore {
    connection: MultiplexedConnection,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisExpiringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisExpiringStore").finish_non_exhaustive()
    }
}

impl RedisExpiringStore {
    /// Connect and verify the server answers `PING`
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let mut connection =
            tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| StoreError::Unavailable {
                    message: format!("timed out after {CONNECT_TIMEOUT:?} connecting to redis"),
                })??;

        let pong: String = bounded(
            COMMAND_TIMEOUT,
            "PING",
            redis::cmd("PING").query_async(&mut connection),
        )
        .await?;
        debug!("Redis answered {}", pong);
        info!("Connected to redis expiring store");
        Ok(Self {
            connection,
            command_timeout: COMMAND_TIMEOUT,
        })
    }

    /// Override the per-command response timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn keys(&self, prefix: &str, pattern: &JobPattern) -> StoreResult<Vec<String>> {
        let mut connection = self.connection.clone();
        let glob = pattern.key_glob(prefix);
        let mut keys: Vec<String> = bounded(
            self.command_timeout,
            "KEYS",
            redis::cmd("KEYS").arg(glob).query_async(&mut connection),
        )
        .await?;
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ExpiringBackend for RedisExpiringStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        let mut command = redis::cmd("SET");
        command.arg(key).arg(value).arg("EX").arg(seconds);
        let _: () = bounded(
            self.command_timeout,
            "SET",
            command.query_async(&mut connection),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("GET");
        command.arg(key);
        let value: Option<String> = bounded(
            self.command_timeout,
            "GET",
            command.query_async(&mut connection),
        )
        .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("DEL");
        command.arg(key);
        let removed: i64 = bounded(
            self.command_timeout,
            "DEL",
            command.query_async(&mut connection),
        )
        .await?;
        Ok(removed > 0)
    }

    async fn scan(
        &self,
        prefix: &str,
        pattern: &JobPattern,
        limit: usize,
    ) -> StoreResult<Vec<(String, String)>> {
        let mut entries = Vec::new();
        for key in self.keys(prefix, pattern).await? {
            if entries.len() >= limit {
                break;
            }
            let Some(job_id) = key.strip_prefix(prefix) else {
                continue;
            };
            // keys can expire between KEYS and GET
            if let Some(value) = self.get(&key).await? {
                entries.push((job_id.to_string(), value));
            }
        }
        Ok(entries)
    }

    async fn count(&self, prefix: &str, pattern: &JobPattern) -> StoreResult<usize> {
        Ok(self.keys(prefix, pattern).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_command_becomes_unavailable() {
        let hung = std::future::pending::<redis::RedisResult<()>>();
        let err = bounded(Duration::from_secs(2), "SET", hung).await.unwrap_err();

        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(err.to_string().contains("redis SET timed out"));
    }

    #[tokio::test]
    async fn test_answered_command_passes_through() {
        let value = bounded(Duration::from_secs(2), "GET", async {
            Ok::<_, redis::RedisError>(Some("payload".to_string()))
        })
        .await
        .unwrap();
        assert_eq!(value, Some("payload".to_string()));
    }
}
