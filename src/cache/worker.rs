//! Кеширующий слой перед статическими ресурсами и сообщения от страницы.

use reqwest::{header::CONTENT_TYPE, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::policy::{CachePolicy, ResourceClass, Strategy, CRITICAL_RESOURCES, HIGH_RESOURCES, NORMAL_RESOURCES};
use super::storage::{CacheStorage, CachedResponse, StorageError};
use crate::config::CacheConfig;
use crate::error::{ErrorKind, Failure};
use crate::models::now_millis;
use crate::services::loader::Priority;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid resource url '{0}'")]
    InvalidUrl(String),

    #[error("fetch {url} failed: {reason}")]
    Fetch { url: String, reason: String },
}

impl From<WorkerError> for Failure {
    fn from(e: WorkerError) -> Self {
        let message = e.to_string();
        match e {
            WorkerError::Storage(_) => Failure::new(ErrorKind::Storage, message),
            WorkerError::InvalidUrl(_) => Failure::validation(message),
            _ => Failure::transport(message),
        }
    }
}

/// Сообщения от страницы.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    CacheClear,
    CacheStatus,
    PreloadResource { data: PreloadData },
    RegisterSync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadData {
    pub url: String,
    #[serde(default = "default_preload_priority")]
    pub priority: Priority,
}

fn default_preload_priority() -> Priority {
    Priority::Normal
}

/// Сообщения странице.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PageEvent {
    BackgroundSync { timestamp: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallReport {
    pub critical: usize,
    pub cached: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntries {
    pub count: usize,
    pub urls: Vec<String>,
}

pub struct CacheWorker {
    http: reqwest::Client,
    storage: Arc<dyn CacheStorage>,
    policy: CachePolicy,
    origin: Url,
    offline_page: String,
    events: broadcast::Sender<PageEvent>,
    sync_registered: AtomicBool,
}

impl CacheWorker {
    pub fn new(
        config: &CacheConfig,
        gateway_endpoints: &[String],
        storage: Arc<dyn CacheStorage>,
    ) -> Result<Self, WorkerError> {
        let origin = Url::parse(&config.origin).map_err(|_| WorkerError::InvalidUrl(config.origin.clone()))?;
        let http = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            http,
            storage,
            policy: CachePolicy::new(config, gateway_endpoints),
            origin,
            offline_page: config.offline_page.clone(),
            events,
            sync_registered: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn resolve(&self, target: &str) -> Result<Url, WorkerError> {
        self.origin
            .join(target)
            .map_err(|_| WorkerError::InvalidUrl(target.to_string()))
    }

    // Свои ресурсы кешируются по пути, чужие по полному адресу
    fn cache_key(&self, url: &Url) -> String {
        if url.origin() != self.origin.origin() {
            return url.to_string();
        }
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    }

    fn cache_for(&self, class: ResourceClass) -> String {
        self.policy.cache_name(class).unwrap_or_default()
    }

    /// Заполнение кешей. Критичные ресурсы ложатся все или ни одного.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        info!("Installing resource caches");
        let mut critical: Vec<&str> = CRITICAL_RESOURCES.to_vec();
        if !critical.contains(&self.offline_page.as_str()) {
            critical.push(&self.offline_page);
        }

        let mut fetched = Vec::with_capacity(critical.len());
        for target in critical {
            let url = self.resolve(target)?;
            let response = network(&self.http, &url).await?;
            if !response.is_cacheable() {
                return Err(WorkerError::Fetch {
                    url: url.to_string(),
                    reason: format!("HTTP {}", response.status),
                });
            }
            fetched.push((self.cache_key(&url), response));
        }

        let cache = self.cache_for(ResourceClass::Critical);
        let mut report = InstallReport { critical: fetched.len(), ..Default::default() };
        for (key, response) in &fetched {
            self.storage.put(&cache, key, response).await?;
        }

        for (class, targets) in [(ResourceClass::High, HIGH_RESOURCES), (ResourceClass::Normal, NORMAL_RESOURCES)] {
            let cache = self.cache_for(class);
            for target in targets {
                match self.store_from_network(&cache, target).await {
                    Ok(true) => report.cached += 1,
                    Ok(false) => report.failed += 1,
                    Err(e) => {
                        warn!("Could not cache {}: {}", target, e);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Resource caches installed: {} critical, {} cached, {} failed",
            report.critical, report.cached, report.failed
        );
        Ok(report)
    }

    async fn store_from_network(&self, cache: &str, target: &str) -> Result<bool, WorkerError> {
        let url = self.resolve(target)?;
        let response = network(&self.http, &url).await?;
        if !response.is_cacheable() {
            debug!("{} returned HTTP {}, not cached", url, response.status);
            return Ok(false);
        }
        self.storage.put(cache, &self.cache_key(&url), &response).await?;
        Ok(true)
    }

    /// Удаляет кеши прошлых версий. Возвращает имена удалённых.
    pub async fn activate(&self) -> Result<Vec<String>, WorkerError> {
        let mut deleted = Vec::new();
        for name in self.storage.cache_names().await? {
            if self.policy.is_current(&name) {
                continue;
            }
            if self.storage.delete_cache(&name).await? {
                info!("Deleted stale cache {}", name);
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Ответ на GET ресурса по стратегии его класса.
    pub async fn fetch(&self, target: &str, document: bool) -> Result<CachedResponse, WorkerError> {
        let url = self.resolve(target)?;
        let class = self.policy.classify(&url);
        let key = self.cache_key(&url);

        let result = match (class.strategy(), self.policy.cache_name(class)) {
            (Strategy::CacheFirst, Some(cache)) => self.cache_first(&cache, &key, &url).await,
            (Strategy::StaleWhileRevalidate, Some(cache)) => self.stale_while_revalidate(cache, key, &url).await,
            (Strategy::NetworkFirst, Some(cache)) => {
                let capped = class == ResourceClass::Dynamic;
                self.network_first(&cache, &key, &url, capped).await
            }
            _ => network(&self.http, &url).await,
        };

        let failure = match result {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        warn!("{} unavailable: {}", url, failure);

        if document {
            let offline_key = self.cache_key(&self.resolve(&self.offline_page)?);
            if let Some(page) = self.storage.find(&offline_key).await? {
                return Ok(page);
            }
        }
        if class == ResourceClass::Remote {
            return Ok(CachedResponse::offline_reply());
        }
        Err(failure)
    }

    async fn cache_first(&self, cache: &str, key: &str, url: &Url) -> Result<CachedResponse, WorkerError> {
        if let Some(cached) = self.storage.get(cache, key).await? {
            return Ok(cached);
        }
        let response = network(&self.http, url).await?;
        if response.is_cacheable() {
            self.storage.put(cache, key, &response).await?;
        }
        Ok(response)
    }

    async fn stale_while_revalidate(&self, cache: String, key: String, url: &Url) -> Result<CachedResponse, WorkerError> {
        let Some(cached) = self.storage.get(&cache, &key).await? else {
            return self.cache_first(&cache, &key, url).await;
        };

        let http = self.http.clone();
        let storage = self.storage.clone();
        let url = url.clone();
        tokio::spawn(async move {
            match network(&http, &url).await {
                Ok(fresh) if fresh.is_cacheable() => {
                    if let Err(e) = storage.put(&cache, &key, &fresh).await {
                        warn!("Could not refresh {}: {}", key, e);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Revalidation of {} skipped: {}", url, e),
            }
        });
        Ok(cached)
    }

    async fn network_first(
        &self,
        cache: &str,
        key: &str,
        url: &Url,
        capped: bool,
    ) -> Result<CachedResponse, WorkerError> {
        match network(&self.http, url).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.storage.put(cache, key, &response).await?;
                    if capped {
                        self.trim(cache).await?;
                    }
                }
                Ok(response)
            }
            Err(e) => match self.storage.get(cache, key).await? {
                Some(cached) => Ok(cached),
                None => Err(e),
            },
        }
    }

    async fn trim(&self, cache: &str) -> Result<(), WorkerError> {
        let keys = self.storage.keys(cache).await?;
        let excess = keys.len().saturating_sub(self.policy.dynamic_max_entries);
        for key in keys.iter().take(excess) {
            self.storage.remove(cache, key).await?;
            debug!("Evicted {} from {}", key, cache);
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<BTreeMap<String, CacheEntries>, WorkerError> {
        let mut status = BTreeMap::new();
        for name in self.storage.cache_names().await? {
            let urls = self.storage.keys(&name).await?;
            status.insert(name, CacheEntries { count: urls.len(), urls });
        }
        Ok(status)
    }

    pub async fn clear(&self) -> Result<usize, WorkerError> {
        let mut cleared = 0;
        for name in self.storage.cache_names().await? {
            if self.storage.delete_cache(&name).await? {
                cleared += 1;
            }
        }
        info!("Cleared {} resource caches", cleared);
        Ok(cleared)
    }

    pub async fn preload(&self, data: &PreloadData) -> Result<bool, WorkerError> {
        let cache = self.cache_for(ResourceClass::for_priority(data.priority));
        self.store_from_network(&cache, &data.url).await
    }

    /// Сообщает странице, что пора синхронизироваться.
    /// Без предварительной регистрации ничего не делает.
    pub fn background_sync(&self) -> usize {
        if !self.sync_registered.load(Ordering::Acquire) {
            return 0;
        }
        let event = PageEvent::BackgroundSync { timestamp: now_millis() };
        self.events.send(event).unwrap_or(0)
    }

    pub async fn handle_message(&self, message: WorkerMessage) -> Result<Value, WorkerError> {
        debug!("Worker message: {:?}", message);
        match message {
            WorkerMessage::CacheClear => Ok(json!({ "cleared": self.clear().await? })),
            WorkerMessage::CacheStatus => Ok(json!(self.status().await?)),
            WorkerMessage::PreloadResource { data } => {
                let cached = self.preload(&data).await?;
                Ok(json!({ "url": data.url, "cached": cached }))
            }
            WorkerMessage::RegisterSync => {
                self.sync_registered.store(true, Ordering::Release);
                let notified = self.background_sync();
                Ok(json!({ "registered": true, "notified": notified }))
            }
        }
    }
}

async fn network(http: &reqwest::Client, url: &Url) -> Result<CachedResponse, WorkerError> {
    let fetch_error = |e: reqwest::Error| WorkerError::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    };
    let response = http.get(url.clone()).send().await.map_err(fetch_error)?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await.map_err(fetch_error)?;
    Ok(CachedResponse::new(status, content_type, body.to_vec()))
}
