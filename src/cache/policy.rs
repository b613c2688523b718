use reqwest::Url;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::services::loader::Priority;

/// Оболочка приложения, без неё работа невозможна.
pub const CRITICAL_RESOURCES: &[&str] = &[
    "/",
    "/index.html",
    "/seats.html",
    "/walkin.html",
    "/styles.css",
    "/config.js",
    "/priority-loader.js",
];

/// Логика приложения: отдаётся из кеша, обновляется в фоне.
pub const HIGH_RESOURCES: &[&str] = &[
    "/api.js",
    "/data-sync-api.js",
    "/offline-db.js",
    "/offline-sync.js",
    "/offline-init.js",
    "/seats-main.js",
    "/walkin-main.js",
    "/sidebar.js",
];

pub const NORMAL_RESOURCES: &[&str] = &[
    "/seats.css",
    "/walkin.css",
    "/sidebar.css",
    "/timeslot.html",
    "/timeslot-main.js",
    "/error-handler.js",
    "/system-lock.js",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    StaleWhileRevalidate,
    NetworkFirst,
    NetworkOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Critical,
    High,
    Normal,
    /// Данные бэкенда, никогда не кешируются.
    Remote,
    /// Всё остальное, кеш ограничен по числу записей.
    Dynamic,
}

impl ResourceClass {
    pub fn strategy(self) -> Strategy {
        match self {
            ResourceClass::Critical => Strategy::CacheFirst,
            ResourceClass::High => Strategy::StaleWhileRevalidate,
            ResourceClass::Normal | ResourceClass::Dynamic => Strategy::NetworkFirst,
            ResourceClass::Remote => Strategy::NetworkOnly,
        }
    }

    fn label(self) -> Option<&'static str> {
        match self {
            ResourceClass::Critical => Some("critical"),
            ResourceClass::High => Some("high"),
            ResourceClass::Normal => Some("normal"),
            ResourceClass::Dynamic => Some("dynamic"),
            ResourceClass::Remote => None,
        }
    }

    /// Кеш для предзагрузки с заданным приоритетом.
    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Critical => ResourceClass::Critical,
            Priority::High => ResourceClass::High,
            _ => ResourceClass::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    version: String,
    gateway_hosts: Vec<String>,
    pub dynamic_max_entries: usize,
}

impl CachePolicy {
    pub fn new(config: &CacheConfig, gateway_endpoints: &[String]) -> Self {
        let gateway_hosts = gateway_endpoints
            .iter()
            .filter_map(|endpoint| Url::parse(endpoint).ok())
            .filter_map(|url| url.host_str().map(str::to_string))
            .collect();
        Self {
            version: config.version.clone(),
            gateway_hosts,
            dynamic_max_entries: config.dynamic_max_entries,
        }
    }

    pub fn classify(&self, url: &Url) -> ResourceClass {
        let path = url.path();
        let remote_host = url
            .host_str()
            .is_some_and(|host| self.gateway_hosts.iter().any(|h| h == host));
        if remote_host
            || path.contains("/api/")
            || path.contains("/sync/")
            || path.ends_with(".json")
            || path.ends_with(".xml")
        {
            return ResourceClass::Remote;
        }

        if CRITICAL_RESOURCES.contains(&path) {
            ResourceClass::Critical
        } else if HIGH_RESOURCES.contains(&path) {
            ResourceClass::High
        } else if NORMAL_RESOURCES.contains(&path) {
            ResourceClass::Normal
        } else {
            ResourceClass::Dynamic
        }
    }

    /// `critical-v2`, `high-v2` и т.д.
    pub fn cache_name(&self, class: ResourceClass) -> Option<String> {
        class.label().map(|label| format!("{}-{}", label, self.version))
    }

    /// Версия может сама содержать дефис, поэтому сравнивается суффикс целиком.
    pub fn is_current(&self, cache_name: &str) -> bool {
        cache_name
            .strip_suffix(self.version.as_str())
            .and_then(|prefix| prefix.strip_suffix('-'))
            .is_some_and(|label| !label.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CachePolicy {
        let config = CacheConfig {
            version: "v2".into(),
            origin: "http://shell.local".into(),
            dynamic_max_entries: 50,
            offline_page: "/offline.html".into(),
        };
        CachePolicy::new(&config, &["https://script.google.com/macros/s/abc/exec".to_string()])
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn classifies_by_path_and_host() {
        let p = policy();
        assert_eq!(p.classify(&url("http://shell.local/")), ResourceClass::Critical);
        assert_eq!(p.classify(&url("http://shell.local/seats-main.js")), ResourceClass::High);
        assert_eq!(p.classify(&url("http://shell.local/timeslot.html")), ResourceClass::Normal);
        assert_eq!(p.classify(&url("http://shell.local/img/logo.png")), ResourceClass::Dynamic);
        assert_eq!(p.classify(&url("http://shell.local/api/seats")), ResourceClass::Remote);
        assert_eq!(p.classify(&url("http://shell.local/sync/status")), ResourceClass::Remote);
        assert_eq!(p.classify(&url("http://shell.local/manifest.json")), ResourceClass::Remote);
        assert_eq!(
            p.classify(&url("https://script.google.com/macros/s/abc/exec?func=testApi")),
            ResourceClass::Remote
        );
    }

    #[test]
    fn strategies_follow_class() {
        assert_eq!(ResourceClass::Critical.strategy(), Strategy::CacheFirst);
        assert_eq!(ResourceClass::High.strategy(), Strategy::StaleWhileRevalidate);
        assert_eq!(ResourceClass::Dynamic.strategy(), Strategy::NetworkFirst);
        assert_eq!(ResourceClass::Remote.strategy(), Strategy::NetworkOnly);
    }

    #[test]
    fn cache_names_carry_version() {
        let p = policy();
        assert_eq!(p.cache_name(ResourceClass::High).as_deref(), Some("high-v2"));
        assert_eq!(p.cache_name(ResourceClass::Remote), None);
        assert!(p.is_current("dynamic-v2"));
        assert!(!p.is_current("dynamic-v1"));
        assert!(!p.is_current("ticket-system"));
    }

    #[test]
    fn dashed_version_keeps_its_own_caches() {
        let config = CacheConfig {
            version: "2024-10".into(),
            origin: "http://shell.local".into(),
            dynamic_max_entries: 50,
            offline_page: "/offline.html".into(),
        };
        let p = CachePolicy::new(&config, &[]);
        let critical = p.cache_name(ResourceClass::Critical).unwrap();
        assert_eq!(critical, "critical-2024-10");
        assert!(p.is_current(&critical));
        assert!(p.is_current("dynamic-2024-10"));
        assert!(!p.is_current("critical-2024-09"));
        assert!(!p.is_current("critical-10"));
        assert!(!p.is_current("2024-10"));
    }
}
