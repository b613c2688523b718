//! Клиент RPC бэкенда.
//!
//! Один примитив [`Gateway::call`]: GET с `callback`, `func`, `params`
//! (JSON-массив) и токеном против кеширования. Адреса перебираются по
//! порядку: транспортная ошибка или таймаут ведут к следующему адресу, отказ
//! бэкенда (`success: false`) возвращается сразу. Вызов никогда не падает,
//! результат всегда [`RpcResult`].
//!
//! Каждая попытка регистрирует имя колбэка в реестре незавершённых вызовов.
//! Регистрация снимается на любом пути выхода, включая отмену future.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{ErrorKind, Failure};
use crate::models::now_millis;
use crate::services::notifier::Notifier;

pub mod api;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcMeta {
    pub function: String,
    /// Индекс адреса, давшего последний ответ.
    pub endpoint: Option<usize>,
    pub attempts: usize,
    pub elapsed_ms: u64,
    pub callback: Option<String>,
}

/// Результат RPC: полезная нагрузка ответа или терминальная ошибка.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResult {
    pub outcome: Result<Map<String, Value>, Failure>,
    pub meta: RpcMeta,
}

impl RpcResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<Map<String, Value>, Failure> {
        self.outcome
    }
}

type Registry = Arc<Mutex<HashSet<String>>>;

// Снимает регистрацию колбэка при drop
struct Registration {
    registry: Registry,
    name: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.remove(&self.name);
    }
}

pub struct Gateway {
    http: reqwest::Client,
    endpoints: Vec<String>,
    timeout: Duration,
    in_flight: Registry,
    sequence: AtomicU64,
    notifier: Notifier,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, notifier: Notifier) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            endpoints: config.endpoints.clone(),
            timeout: config.timeout(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            sequence: AtomicU64::new(0),
            notifier,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Число незавершённых попыток.
    pub fn pending_calls(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub async fn call(&self, function: &str, params: Vec<Value>) -> RpcResult {
        let started = Instant::now();
        let params_json = Value::Array(params).to_string();
        let mut meta = RpcMeta {
            function: function.to_string(),
            endpoint: None,
            attempts: 0,
            elapsed_ms: 0,
            callback: None,
        };
        let mut last_failure = Failure::transport("no backend endpoints configured");

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let callback = self.callback_name(function);
            let _registration = self.register(&callback);
            meta.attempts += 1;
            meta.endpoint = Some(index);
            meta.callback = Some(callback.clone());

            debug!("RPC {} via endpoint #{} ({})", function, index, callback);
            let attempt = self.attempt(endpoint, function, &params_json, &callback);
            let failure = match tokio::time::timeout(self.timeout, attempt).await {
                Ok(Ok(payload)) => {
                    meta.elapsed_ms = started.elapsed().as_millis() as u64;
                    return RpcResult { outcome: Ok(payload), meta };
                }
                Ok(Err(failure)) if failure.kind == ErrorKind::Application => {
                    meta.elapsed_ms = started.elapsed().as_millis() as u64;
                    debug!("RPC {} rejected by backend: {}", function, failure.message);
                    return RpcResult { outcome: Err(failure), meta };
                }
                Ok(Err(failure)) => failure,
                Err(_) => Failure::timeout(format!(
                    "{} got no response within {} ms",
                    function,
                    self.timeout.as_millis()
                )),
            };

            warn!("RPC {} failed on endpoint #{}: {}", function, index, failure);
            last_failure = failure;
        }

        meta.elapsed_ms = started.elapsed().as_millis() as u64;
        RpcResult { outcome: Err(last_failure), meta }
    }

    fn callback_name(&self, function: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("rpcCallback_{}_{}_{}", function, now_millis(), seq)
    }

    fn register(&self, name: &str) -> Registration {
        let mut registry = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        registry.insert(name.to_string());
        Registration {
            registry: self.in_flight.clone(),
            name: name.to_string(),
        }
    }

    async fn attempt(
        &self,
        endpoint: &str,
        function: &str,
        params_json: &str,
        callback: &str,
    ) -> Result<Map<String, Value>, Failure> {
        let buster = format!("{}{}", now_millis(), self.sequence.load(Ordering::Relaxed));
        let url = request_url(endpoint, function, params_json, callback, &buster)?;

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Failure::transport(format!("{} request failed: {}", function, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::transport(format!("{} returned HTTP {}", function, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Failure::transport(format!("{} body unreadable: {}", function, e)))?;

        interpret(decode_body(&body, callback)?)
    }

    /// Терминальная ошибка операции: уведомление оператору и `reportError`
    /// на основной адрес. Вызывается один раз на операцию, не на попытку.
    pub fn report_failure(&self, operation: &str, failure: &Failure) {
        self.notifier.report(operation, failure);

        let Some(primary) = self.endpoints.first().cloned() else {
            return;
        };
        let http = self.http.clone();
        let timeout = self.timeout;
        // Мимо call, чтобы не зациклиться
        let params = serde_json::json!([format!("{}: {}", operation, failure)]).to_string();
        let callback = format!("rpcCallback_reportError_{}", now_millis());

        tokio::spawn(async move {
            let Ok(url) = request_url(&primary, "reportError", &params, &callback, &now_millis().to_string()) else {
                return;
            };
            match http.get(&url).timeout(timeout).send().await {
                Ok(_) => debug!("Error reported to backend"),
                Err(e) => debug!("Error report not delivered: {}", e),
            }
        });
    }
}

fn request_url(
    endpoint: &str,
    function: &str,
    params_json: &str,
    callback: &str,
    buster: &str,
) -> Result<String, Failure> {
    let query = serde_urlencoded::to_string([
        ("callback", callback),
        ("func", function),
        ("params", params_json),
        ("_", buster),
    ])
    .map_err(|e| Failure::validation(format!("cannot encode {} params: {}", function, e)))?;

    let separator = if endpoint.contains('?') { '&' } else { '?' };
    Ok(format!("{}{}{}", endpoint, separator, query))
}

/// Тело ответа: голый JSON или JSONP `callback({...});`.
fn decode_body(body: &str, callback: &str) -> Result<Value, Failure> {
    let trimmed = body.trim().trim_end_matches(';').trim_end();
    let json = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        trimmed
    } else {
        let open = trimmed
            .find('(')
            .ok_or_else(|| Failure::transport("response is neither JSON nor JSONP"))?;
        let name = trimmed[..open].trim();
        if name != callback {
            return Err(Failure::transport(format!(
                "response addressed to '{}' instead of '{}'",
                name, callback
            )));
        }
        let close = trimmed
            .rfind(')')
            .filter(|&close| close > open)
            .ok_or_else(|| Failure::transport("unterminated JSONP response"))?;
        &trimmed[open + 1..close]
    };

    serde_json::from_str(json).map_err(|e| Failure::transport(format!("malformed response body: {}", e)))
}

fn interpret(value: Value) -> Result<Map<String, Value>, Failure> {
    let Value::Object(payload) = value else {
        return Err(Failure::transport("response is not an object"));
    };
    match payload.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(payload),
        Some(false) => {
            let message = payload
                .get("error")
                .or_else(|| payload.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("backend rejected the request");
            Err(Failure::application(message))
        }
        None => Err(Failure::transport("response has no success flag")),
    }
}
