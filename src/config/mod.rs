use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::PerformanceId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("{0} must list at least one endpoint")]
    Empty(&'static str),
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub sync: SyncConfig,
    pub fallback: FallbackConfig,
    pub loader: LoaderConfig,
    pub cache: CacheConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub debug_mode: bool,
    pub json_logs: bool,
}

// Бэкенд: упорядоченный список адресов, первый - основной
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub endpoints: Vec<String>,
    pub timeout_ms: u64,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Локальное хранилище
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

// Redis для кеша ресурсов, необязателен
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

// Очередь изменений и синхронизация
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub performance_id: Option<PerformanceId>,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// Деградация в режим прямых вызовов
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    pub max_offline_errors: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl FallbackConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub yield_ms: u64,
}

impl LoaderConfig {
    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_ms)
    }
}

// Кеш статических ресурсов
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub version: String,
    pub origin: String,
    pub dynamic_max_entries: usize,
    pub offline_page: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                rust_log: default_log_filter(false),
                debug_mode: false,
                json_logs: false,
            },
            gateway: GatewayConfig {
                endpoints: Vec::new(),
                timeout_ms: 15_000,
            },
            database: DatabaseConfig {
                url: "sqlite://seat_sync.db?mode=rwc".to_string(),
            },
            redis: RedisConfig { url: None },
            sync: SyncConfig {
                interval_secs: 30,
                max_retries: 3,
                retry_delay_ms: 1000,
                performance_id: None,
            },
            fallback: FallbackConfig {
                max_offline_errors: 3,
                max_retries: 3,
                retry_delay_ms: 1000,
            },
            loader: LoaderConfig { yield_ms: 50 },
            cache: CacheConfig {
                version: "v2".to_string(),
                origin: "http://127.0.0.1:8000".to_string(),
                dynamic_max_entries: 50,
                offline_page: "/offline.html".to_string(),
            },
        }
    }
}

fn default_log_filter(debug: bool) -> String {
    if debug {
        "seat_sync=debug,tower_http=debug".to_string()
    } else {
        "seat_sync=info,tower_http=info".to_string()
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let debug_mode = parse_var("DEBUG_MODE", false)?;
        let endpoints: Vec<String> = env::var("GAS_API_URLS")
            .unwrap_or_default()
            .split(',')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(ConfigError::Empty("GAS_API_URLS"));
        }

        let performance_id = match optional_var("PERFORMANCE_ID") {
            Some(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                name: "PERFORMANCE_ID",
                value,
            })?),
            None => None,
        };

        Ok(Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| defaults.app.host.clone()),
                port: parse_var("PORT", defaults.app.port)?,
                rust_log: env::var("RUST_LOG").unwrap_or_else(|_| default_log_filter(debug_mode)),
                debug_mode,
                json_logs: env::var("LOG_FORMAT").map(|f| f.eq_ignore_ascii_case("json")).unwrap_or(false),
            },
            gateway: GatewayConfig {
                endpoints,
                timeout_ms: parse_var("GATEWAY_TIMEOUT_MS", defaults.gateway.timeout_ms)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database.url.clone()),
            },
            redis: RedisConfig {
                url: optional_var("REDIS_URL"),
            },
            sync: SyncConfig {
                interval_secs: parse_var("SYNC_INTERVAL_SECS", defaults.sync.interval_secs)?,
                max_retries: parse_var("SYNC_MAX_RETRIES", defaults.sync.max_retries)?,
                retry_delay_ms: parse_var("SYNC_RETRY_DELAY_MS", defaults.sync.retry_delay_ms)?,
                performance_id,
            },
            fallback: FallbackConfig {
                max_offline_errors: parse_var("MAX_OFFLINE_ERRORS", defaults.fallback.max_offline_errors)?,
                max_retries: parse_var("FALLBACK_MAX_RETRIES", defaults.fallback.max_retries)?,
                retry_delay_ms: parse_var("FALLBACK_RETRY_DELAY_MS", defaults.fallback.retry_delay_ms)?,
            },
            loader: LoaderConfig {
                yield_ms: parse_var("LOADER_YIELD_MS", defaults.loader.yield_ms)?,
            },
            cache: CacheConfig {
                version: env::var("CACHE_VERSION").unwrap_or_else(|_| defaults.cache.version.clone()),
                origin: env::var("CACHE_ORIGIN").unwrap_or_else(|_| defaults.cache.origin.clone()),
                dynamic_max_entries: parse_var("CACHE_DYNAMIC_MAX_ENTRIES", defaults.cache.dynamic_max_entries)?,
                offline_page: env::var("OFFLINE_PAGE").unwrap_or_else(|_| defaults.cache.offline_page.clone()),
            },
        })
    }

    /// Конфигурация для тестов: быстрые таймеры, заданные эндпоинты.
    pub fn for_endpoints(endpoints: Vec<String>) -> Self {
        let mut config = Config::default();
        config.gateway.endpoints = endpoints;
        config.gateway.timeout_ms = 500;
        config.database.url = "sqlite::memory:".to_string();
        config.sync.retry_delay_ms = 5;
        config.fallback.retry_delay_ms = 5;
        config.loader.yield_ms = 1;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.gateway.timeout(), Duration::from_secs(15));
        assert_eq!(config.sync.interval(), Duration::from_secs(30));
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.fallback.max_offline_errors, 3);
        assert_eq!(config.cache.dynamic_max_entries, 50);
        assert_eq!(config.cache.version, "v2");
    }

    #[test]
    fn parse_var_rejects_garbage() {
        // Уникальное имя, чтобы не пересекаться с другими тестами
        env::set_var("SEAT_SYNC_TEST_PORT", "eighty");
        let err = parse_var::<u16>("SEAT_SYNC_TEST_PORT", 1).unwrap_err();
        assert!(err.to_string().contains("SEAT_SYNC_TEST_PORT"));
        env::remove_var("SEAT_SYNC_TEST_PORT");
        assert_eq!(parse_var::<u16>("SEAT_SYNC_TEST_PORT", 7).unwrap(), 7);
    }
}
