use anyhow::{anyhow, Context};
use axum::{routing::get, Router};
use mimalloc::MiMalloc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{self, JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_sync::{
    cache::{PageEvent, WorkerMessage},
    config::{AppConfig, Config},
    controllers,
    error::Failure,
    models::PerformanceId,
    services::loader::Priority,
    store::CACHED_PERFORMANCES,
    AppState,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_tracing(app: &AppConfig) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&app.rust_log));
    if app.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

// Подписчик на сообщения кеширующего слоя
fn spawn_page_listener(state: Arc<AppState>, mut events: broadcast::Receiver<PageEvent>) -> JoinHandle<()> {
    task::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PageEvent::BackgroundSync { timestamp }) => {
                    debug!("Background sync requested at {}", timestamp);
                    state.sync.run_background_sync().await;
                }
                Err(RecvError::Lagged(skipped)) => warn!("Page listener skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Запуск по приоритетам: хранилище, кеш ресурсов, подписчики,
/// первичная загрузка, предзагрузка снимков.
async fn startup(state: Arc<AppState>, events: broadcast::Receiver<PageEvent>) {
    let loader = &state.loader;

    let s = state.clone();
    let probe = loader.enqueue(Priority::Critical, async move {
        Ok::<_, Failure>(s.fallback.check_offline_availability().await)
    });

    let s = state.clone();
    let caches = loader.enqueue(Priority::High, async move {
        let report = s.worker.install().await?;
        let stale = s.worker.activate().await?;
        s.worker.handle_message(WorkerMessage::RegisterSync).await?;
        Ok::<_, Failure>((report, stale.len()))
    });

    let s = state.clone();
    let listeners = loader.enqueue(Priority::Normal, async move {
        spawn_page_listener(s.clone(), events);
        s.sync.clone().spawn_periodic();
        Ok::<_, Failure>(())
    });

    let s = state.clone();
    let initial = loader.enqueue(Priority::Low, async move {
        let snapshot = s.sync.sync_data().await?;
        Ok::<_, Failure>(snapshot.map(|snapshot| snapshot.seats.len()))
    });

    let s = state.clone();
    let preloads = loader.enqueue(Priority::Background, async move {
        let cached: BTreeSet<String> = match s.store.get_setting(CACHED_PERFORMANCES).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => BTreeSet::new(),
        };
        let mut preloaded = 0;
        for raw in cached {
            let Ok(performance_id) = raw.parse::<PerformanceId>() else {
                continue;
            };
            match s.sync.preload_performance(&performance_id).await {
                Ok(_) => preloaded += 1,
                Err(e) => warn!("Preload of {} failed: {}", performance_id, e),
            }
        }
        Ok::<_, Failure>(preloaded)
    });

    match probe.await {
        Ok(true) => info!("Local store ready"),
        Ok(false) => warn!("Local store unavailable, running in fallback mode"),
        Err(e) => error!("Store probe failed: {}", e),
    }
    match caches.await {
        Ok((report, stale)) => info!(
            "Resource cache ready: {} critical, {} cached, {} stale caches removed",
            report.critical, report.cached, stale
        ),
        Err(e) => warn!("Resource cache not installed: {}", e),
    }
    if let Err(e) = listeners.await {
        error!("Listener wiring failed: {}", e);
    }
    match initial.await {
        Ok(Some(seats)) => info!("Initial pull loaded {} seats", seats),
        Ok(None) => debug!("Initial pull skipped"),
        Err(e) => warn!("Initial pull failed: {}", e),
    }
    match preloads.await {
        Ok(count) => info!("Preloaded {} performance snapshots", count),
        Err(e) => warn!("Preload failed: {}", e),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config.app);

    info!(
        "Starting seat_sync with {} backend endpoint(s)",
        config.gateway.endpoints.len()
    );

    let app_state = AppState::new(config.clone())
        .await
        .map_err(|e| anyhow!("failed to build application state: {}", e))?;

    // Подписка до регистрации синхронизации, чтобы не потерять первое событие
    let events = app_state.worker.subscribe();
    task::spawn(startup(app_state.clone(), events));

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .merge(controllers::worker::routes())
        .fallback(controllers::worker::serve_resource)
        .with_state(app_state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.app.host, config.app.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
