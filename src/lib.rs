pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;
use tracing::warn;

use cache::{CacheStorage, CacheWorker, MemoryStorage, RedisStorage};
use gateway::Gateway;
use services::{fallback::FallbackManager, loader::PriorityLoader, notifier::Notifier, sync::Synchronizer};
use store::{OfflineStore, SqliteStore};

// Shared state для всего приложения
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<dyn OfflineStore>,
    pub notifier: Notifier,
    pub gateway: Arc<Gateway>,
    pub sync: Arc<Synchronizer>,
    pub fallback: FallbackManager,
    pub loader: PriorityLoader,
    pub worker: CacheWorker,
}

impl AppState {
    /// Собирает сервисы. Хранилище открывается лениво, проверка - в `init`.
    pub async fn new(config: config::Config) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let db = database::Database::new(&config.database.url)?;
        let store: Arc<dyn OfflineStore> = Arc::new(SqliteStore::new(db));
        Self::with_store(config, store).await
    }

    pub async fn with_store(
        config: config::Config,
        store: Arc<dyn OfflineStore>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let notifier = Notifier::default();
        let gateway = Arc::new(Gateway::new(&config.gateway, notifier.clone())?);
        let sync = Arc::new(Synchronizer::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            config.sync.clone(),
        ));
        let fallback = FallbackManager::new(sync.clone(), gateway.clone(), notifier.clone(), config.fallback.clone());

        let storage: Arc<dyn CacheStorage> = match &config.redis.url {
            Some(url) => match RedisStorage::connect(url).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    warn!("Redis unavailable, resource cache kept in memory: {}", e);
                    Arc::new(MemoryStorage::new())
                }
            },
            None => Arc::new(MemoryStorage::new()),
        };
        let worker = CacheWorker::new(&config.cache, &config.gateway.endpoints, storage)?;
        let loader = PriorityLoader::start(config.loader.yield_delay());

        Ok(Arc::new(Self {
            config,
            store,
            notifier,
            gateway,
            sync,
            fallback,
            loader,
            worker,
        }))
    }
}
