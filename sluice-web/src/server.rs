//! JSON gateway server for Sluice
//!
//! Builds the router over a shared [`AppState`] and runs it until ctrl-c,
//! then drains the acquisition registry.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{delete, get};
use sluice_core::acquisition::{AcquisitionRegistry, ReadinessGate};
use sluice_core::config::SluiceConfig;
use sluice_core::content::{ContentDescriptor, ContentId};
use sluice_core::engine::{ContentEngine, EngineHints, build_engine};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handlers::{
    add_content_json, add_content_query, content_info, content_progress, list_content,
    remove_content, server_stats, service_index, stream_file,
};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: AcquisitionRegistry,
    pub readiness: ReadinessGate,
    pub config: Arc<SluiceConfig>,
    pub server_started_at: Instant,
}

impl AppState {
    pub fn new(config: SluiceConfig, engine: Arc<dyn ContentEngine>) -> Self {
        let registry = AcquisitionRegistry::new(engine, config.acquisition.metadata_timeout);
        let readiness = ReadinessGate::new(config.acquisition.readiness_poll_interval);
        Self {
            registry,
            readiness,
            config: Arc::new(config),
            server_started_at: Instant::now(),
        }
    }

    /// Announce hints for `descriptor`: its own trackers, then the defaults.
    pub fn hints_for(&self, descriptor: &ContentDescriptor) -> EngineHints {
        EngineHints::merged(descriptor, &self.config.acquisition.default_trackers)
    }

    /// Public URL streaming file `index` of `id`.
    pub fn stream_url(&self, id: ContentId, index: usize) -> String {
        format!("{}/stream/{}/{}", self.config.server.base_url(), id, index)
    }
}

/// Routes of the gateway, with permissive CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_index))
        .route("/add", get(add_content_query).post(add_content_json))
        .route("/info", get(content_info))
        .route("/stream/{info_hash}/{file_index}", get(stream_file))
        .route("/progress/{info_hash}", get(content_progress))
        .route("/torrents", get(list_content))
        .route("/list", get(list_content))
        .route("/stats", get(server_stats))
        .route("/remove/{info_hash}", delete(remove_content))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the gateway until ctrl-c.
///
/// # Errors
/// Fails if the engine cannot be built or the listener cannot bind.
pub async fn run_server(config: SluiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = build_engine(&config.engine).await?;
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let state = AppState::new(config, engine);
    info!(
        "Sluice gateway listening on http://{} ({} engine)",
        listener.local_addr()?,
        state.registry.engine_name()
    );

    let registry = state.registry.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let released = registry.drain().await;
    info!("Shutdown complete, released {} acquisitions", released);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
