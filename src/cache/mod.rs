//! Кеш статических ресурсов приложения.
//!
//! Класс ресурса задаёт стратегию: оболочка - сначала кеш, логика - кеш с
//! фоновым обновлением, данные бэкенда - только сеть, остальное - сначала сеть.

pub mod policy;
pub mod storage;
pub mod worker;

pub use policy::{CachePolicy, ResourceClass, Strategy};
pub use storage::{CacheStorage, CachedResponse, MemoryStorage, RedisStorage, StorageError};
pub use worker::{CacheWorker, PageEvent, PreloadData, WorkerError, WorkerMessage};
