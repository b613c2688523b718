//! Хранилища для кеша ресурсов: в памяти (по умолчанию) и Redis.
//!
//! Кеш - именованная коллекция "ключ запроса -> ответ" с порядком вставки.
//! Повторный `put` того же ключа заменяет ответ, но не двигает его в очереди.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt cache entry: {0}")]
    Entry(#[from] serde_json::Error),

    #[error("corrupt cache body: {0}")]
    Body(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, content_type: Option<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { status, content_type, body: body.into() }
    }

    /// В кеш попадают только ответы 200.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
    }

    /// Ответ на запрос к бэкенду без сети.
    pub fn offline_reply() -> Self {
        Self::new(
            503,
            Some("application/json".to_string()),
            r#"{"success":false,"error":"offline"}"#,
        )
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<(), StorageError>;

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, StorageError>;

    /// Ключи кеша, от старых к новым.
    async fn keys(&self, cache: &str) -> Result<Vec<String>, StorageError>;

    async fn remove(&self, cache: &str, key: &str) -> Result<bool, StorageError>;

    async fn cache_names(&self) -> Result<Vec<String>, StorageError>;

    async fn delete_cache(&self, cache: &str) -> Result<bool, StorageError>;

    /// Поиск ключа во всех кешах по очереди.
    async fn find(&self, key: &str) -> Result<Option<CachedResponse>, StorageError> {
        for cache in self.cache_names().await? {
            if let Some(response) = self.get(&cache, key).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    caches: RwLock<BTreeMap<String, Vec<(String, CachedResponse)>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<(), StorageError> {
        let mut caches = self.caches.write().await;
        let entries = caches.entry(cache.to_string()).or_default();
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = response.clone(),
            None => entries.push((key.to_string(), response.clone())),
        }
        Ok(())
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, StorageError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(cache)
            .and_then(|entries| entries.iter().find(|(k, _)| k == key))
            .map(|(_, response)| response.clone()))
    }

    async fn keys(&self, cache: &str) -> Result<Vec<String>, StorageError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(cache)
            .map(|entries| entries.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default())
    }

    async fn remove(&self, cache: &str, key: &str) -> Result<bool, StorageError> {
        let mut caches = self.caches.write().await;
        let Some(entries) = caches.get_mut(cache) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        Ok(entries.len() != before)
    }

    async fn cache_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool, StorageError> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }
}

const REGISTRY_KEY: &str = "seat_sync:caches";
const SEQUENCE_KEY: &str = "seat_sync:caches:seq";

fn entries_key(cache: &str) -> String {
    format!("seat_sync:cache:{}", cache)
}

fn order_key(cache: &str) -> String {
    format!("seat_sync:cache:{}:order", cache)
}

// Запись в Redis: тело в base64 внутри JSON
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl From<&CachedResponse> for StoredEntry {
    fn from(response: &CachedResponse) -> Self {
        Self {
            status: response.status,
            content_type: response.content_type.clone(),
            body: general_purpose::STANDARD.encode(&response.body),
        }
    }
}

impl TryFrom<StoredEntry> for CachedResponse {
    type Error = StorageError;

    fn try_from(entry: StoredEntry) -> Result<Self, Self::Error> {
        Ok(CachedResponse {
            status: entry.status,
            content_type: entry.content_type,
            body: general_purpose::STANDARD.decode(entry.body)?,
        })
    }
}

/// Кеш в Redis: hash с ответами и sorted set с порядком вставки на каждый кеш,
/// плюс общий set с именами кешей.
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
}

impl RedisStorage {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        info!("Resource cache backed by Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStorage for RedisStorage {
    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<(), StorageError> {
        let entry = serde_json::to_string(&StoredEntry::from(response))?;
        let mut conn = self.conn.clone();
        let seq: i64 = conn.incr(SEQUENCE_KEY, 1).await?;

        // NX: повторная запись не меняет позицию ключа
        let _: () = redis::pipe()
            .atomic()
            .sadd(REGISTRY_KEY, cache)
            .ignore()
            .hset(entries_key(cache), key, entry)
            .ignore()
            .cmd("ZADD")
            .arg(order_key(cache))
            .arg("NX")
            .arg(seq)
            .arg(key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>, StorageError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(entries_key(cache), key).await?;
        match raw {
            Some(raw) => {
                let entry: StoredEntry = serde_json::from_str(&raw)?;
                Ok(Some(entry.try_into()?))
            }
            None => Ok(None),
        }
    }

    async fn keys(&self, cache: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn.clone();
        Ok(conn.zrange(order_key(cache), 0, -1).await?)
    }

    async fn remove(&self, cache: &str, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let (removed, _): (u32, u32) = redis::pipe()
            .atomic()
            .hdel(entries_key(cache), key)
            .zrem(order_key(cache), key)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn cache_names(&self) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn.smembers(REGISTRY_KEY).await?;
        names.sort();
        Ok(names)
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let (removed, _): (u32, u32) = redis::pipe()
            .atomic()
            .srem(REGISTRY_KEY, cache)
            .del(&[entries_key(cache), order_key(cache)])
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
