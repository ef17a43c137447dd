use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use instafit_api::config::{ServerConfig, StorageBackend};
use instafit_api::router::build_app_router;
use instafit_api::state::AppState;
use instafit_cloud::memory::MemoryStorage;
use instafit_cloud::r2::R2Storage;
use instafit_cloud::storage::ObjectStorage;
use instafit_comfyui::api::ComfyUIApi;
use instafit_comfyui::job::JobClient;
use instafit_comfyui::supervisor::EngineSupervisor;
use instafit_comfyui::template::JobTemplate;
use instafit_pipeline::pipeline::SegmentationPipeline;
use instafit_pipeline::segmenter::build_segmenter;

#[tokio::main]
async fn main() {
    // `.env.{APP_ENV}` wins over `.env`; neither is required.
    let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".into());
    if dotenvy::from_filename(format!(".env.{app_env}")).is_err() {
        dotenvy::dotenv().ok();
    }

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "instafit_api=debug,instafit_comfyui=debug,instafit_pipeline=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        app_env = %app_env,
        engine_url = %config.engine.api_url,
        autostart = config.engine.autostart_enabled(),
        "Loaded server configuration",
    );

    // --- Storage ---
    let storage: Arc<dyn ObjectStorage> = match &config.storage {
        StorageBackend::R2(r2) => {
            tracing::info!(bucket = %r2.bucket, "Using R2 object storage");
            Arc::new(R2Storage::connect(r2).await)
        }
        StorageBackend::Memory { base_url } => {
            tracing::warn!(%base_url, "Using in-memory object storage; objects are lost on restart");
            Arc::new(MemoryStorage::new(base_url.clone()))
        }
    };

    // --- Segmentation pipeline ---
    let segmenter = build_segmenter(&config.segmenter);
    let pipeline = Arc::new(SegmentationPipeline::new(
        segmenter,
        Arc::clone(&storage),
        config.pipeline.clone(),
    ));

    // --- Generation engine ---
    let engine_api = ComfyUIApi::new(config.engine.api_url.clone());
    let supervisor = Arc::new(EngineSupervisor::from_config(
        engine_api.clone(),
        &config.engine,
    ));
    let jobs = Arc::new(JobClient::with_api(engine_api, &config.engine));

    // A broken template only fails try-on requests, so it is not fatal here.
    match JobTemplate::load(&config.engine.workflow_path).await {
        Ok(template) => {
            let missing = template.missing_targets();
            if missing.is_empty() {
                tracing::info!(nodes = template.len(), "Job template loaded");
            } else {
                let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
                tracing::warn!(?missing, "Job template lacks patch targets");
            }
        }
        Err(e) => tracing::error!(error = %e, "Job template could not be loaded"),
    }

    if supervisor.is_ready().await {
        tracing::info!("Generation engine is reachable");
    } else {
        tracing::warn!("Generation engine is not reachable yet; it will be started on demand");
    }

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        storage,
        pipeline,
        supervisor: Arc::clone(&supervisor),
        jobs,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    supervisor.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
