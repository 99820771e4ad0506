//! Station Alerts API Server
//!
//! REST API for measurement ingestion, threshold configuration and the
//! alert inbox.

use alerting::{AlertManager, ThresholdRegistry};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ingestion::Coordinator;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use storage::{AlertStore, MemoryStore, SqliteStore, StorageError, Store};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub mod error;
pub mod routes;
pub mod settings;

pub use settings::{DatabaseSettings, LoggingSettings, ServerSettings, Settings};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub coordinator: Coordinator,
    pub registry: ThresholdRegistry,
    pub alerts: AlertManager,
    /// Prometheus exposition, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the engine components over one store
    pub fn new(
        store: Arc<dyn Store>,
        settings: &Settings,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            coordinator: Coordinator::new(
                Arc::clone(&store),
                settings.ingestion.clone(),
                &settings.alerting,
            ),
            registry: ThresholdRegistry::new(Arc::clone(&store)),
            alerts: AlertManager::new(Arc::clone(&store), settings.alerting.clone()),
            store,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub database: String,
    pub active_alerts: u64,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route(
            "/api/v1/measurements",
            get(routes::measurements::list).post(routes::measurements::create),
        )
        .route(
            "/api/v1/measurements/batch",
            post(routes::measurements::create_batch),
        )
        .route(
            "/api/v1/measurements/:id/evaluate",
            post(routes::measurements::evaluate),
        )
        .route("/api/v1/alerts", get(routes::alerts::get_alerts))
        .route(
            "/api/v1/alerts/active-summary",
            get(routes::alerts::active_summary),
        )
        .route("/api/v1/alerts/:id", get(routes::alerts::get_alert))
        .route(
            "/api/v1/alerts/:id/action",
            post(routes::alerts::apply_action),
        )
        .route(
            "/api/v1/thresholds",
            get(routes::thresholds::list).post(routes::thresholds::create),
        )
        .route(
            "/api/v1/thresholds/:id",
            get(routes::thresholds::get).put(routes::thresholds::update),
        )
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (database, active_alerts) = match state.store.active_alert_counts().await {
        Ok(rows) => ("ok", rows.iter().map(|(_, _, count)| *count).sum::<u64>()),
        Err(e) => {
            warn!(error = %e, "Health check could not reach the store");
            ("error", 0)
        }
    };

    let status = if database == "ok" { "healthy" } else { "degraded" };
    let response = HealthResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database: database.to_string(),
        active_alerts,
    };

    Json(response)
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
pub fn init_logging(
    settings: &LoggingSettings,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}

/// Install the global metrics recorder
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Open the configured store
pub async fn open_store(settings: &DatabaseSettings) -> Result<Arc<dyn Store>, StorageError> {
    if settings.url == "memory" {
        warn!("Using the in-process memory store; data is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = if settings.is_in_memory() {
        SqliteStore::in_memory().await?
    } else {
        SqliteStore::connect(&settings.url, settings.max_connections).await?
    };
    Ok(Arc::new(store))
}

/// Run the server until Ctrl-C
pub async fn run_server(
    settings: Settings,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let store = open_store(&settings.database).await?;
    let state = Arc::new(AppState::new(store, &settings, metrics));

    let mut app = create_router(state);
    if settings.server.cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = settings.server.addr();
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
