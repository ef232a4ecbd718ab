use redis::AsyncCommands;
use redis::Client;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Movie list response, keyed by a digest of the varying request headers
    MovieList(String),
}

impl CacheKey {
    /// Builds the movie list key so that callers with different
    /// `Authorization` or `Cookie` headers never share an entry
    pub fn movie_list(authorization: Option<&str>, cookie: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(authorization.unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(cookie.unwrap_or_default().as_bytes());
        CacheKey::MovieList(hex::encode(hasher.finalize()))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::MovieList(vary) => write!(f, "movies:{}", vary),
        }
    }
}

/// Creates a Redis client for caching
///
/// Establishes a connection to Redis for fast data caching.
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Cache handler for storing and retrieving data from Redis
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Initiates a graceful shutdown of the cache writer
    ///
    /// Sends a shutdown signal to the writer task and waits for it to flush
    /// all pending writes to Redis.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");

        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task failed");
        }
    }
}

impl Cache {
    /// Creates a new Cache instance with an async write background task
    ///
    /// Writes go through a channel so a slow Redis never delays a response.
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        let task = tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        let handle = CacheWriterHandle { shutdown_tx, task };

        (cache, handle)
    }

    /// Drains write messages until shutdown, then flushes what is left
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");
        let mut failed_writes = 0u64;

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        failed_writes += 1;
                        tracing::error!(error = %e, failed_writes, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cache writer shutting down, flushing remaining writes");

                    write_rx.close();
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }

    /// Retrieves a value from the cache by key
    ///
    /// Returns `None` on a miss; a present but undecodable entry is an error.
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(format!("{}", key)).await?;

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Stores a value in the cache asynchronously without blocking
    ///
    /// The value is serialized here and handed to the background writer;
    /// failures are logged, never returned.
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let msg = CacheWriteMessage {
            key: format!("{}", key),
            value: json,
            ttl,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_list_key_prefix() {
        let key = CacheKey::movie_list(Some("Token abc"), None);
        let rendered = format!("{}", key);
        assert!(rendered.starts_with("movies:"));
        assert_eq!(rendered.len(), "movies:".len() + 64);
    }

    #[test]
    fn test_movie_list_key_varies_on_authorization() {
        let a = CacheKey::movie_list(Some("Token abc"), None);
        let b = CacheKey::movie_list(Some("Token xyz"), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_movie_list_key_varies_on_cookie() {
        let a = CacheKey::movie_list(Some("Token abc"), Some("sessionid=1"));
        let b = CacheKey::movie_list(Some("Token abc"), Some("sessionid=2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_movie_list_key_does_not_mix_headers() {
        let a = CacheKey::movie_list(Some("ab"), Some("c"));
        let b = CacheKey::movie_list(Some("a"), Some("bc"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_movie_list_key_is_stable() {
        let a = CacheKey::movie_list(Some("Token abc"), Some("x=1"));
        let b = CacheKey::movie_list(Some("Token abc"), Some("x=1"));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_writer_to_stop() {
        // Nothing listens on port 1, so the flushed write fails fast
        let client = create_redis_client("redis://127.0.0.1:1/").unwrap();
        let (cache, handle) = Cache::new(client).await;
        cache.set_in_background(&CacheKey::movie_list(None, None), &vec![1, 2, 3], 60);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle.shutdown())
            .await
            .expect("writer did not stop");

        // The writer owned the receiver, so it is gone once shutdown returns
        assert!(cache.write_tx.is_closed());
    }
}
