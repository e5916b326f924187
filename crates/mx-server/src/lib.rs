use std::path::PathBuf;
use std::sync::Arc;

use axum::http::header::HeaderName;
use axum::routing::{delete, get, post};
use axum::Router;
use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mx_common::cache::{StatusCache, TaskQueue};
use mx_common::db::{create_pool_from_url, run_migrations, PgPool};
use mx_common::error::ExportError;
use mx_common::logging::init_tracing;

pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod registry;
pub mod storage;

use auth::{AuthProvider, HttpAuthProvider};
use config::Config;
use export::worker::spawn_workers;
use handlers::{download, exports, health};
use registry::{ConsulRegistry, ConsulResolver};
use storage::{FileService, HttpFileService};

pub struct AppState {
    pub pool: PgPool,
    pub cache: StatusCache,
    pub queue: TaskQueue,
    pub files: Arc<dyn FileService>,
    pub auth: Arc<dyn AuthProvider>,
    pub temp_dir: PathBuf,
    pub pdf_captions: bool,
}

pub type SharedState = Arc<AppState>;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/api/v1/exports/screenrecording",
            post(exports::create_screenrecording_export).get(exports::list_screenrecording_exports),
        )
        .route(
            "/api/v1/exports/call",
            post(exports::create_call_export).get(exports::list_call_exports),
        )
        .route("/api/v1/exports/:id/download", get(download::download_export))
        .route("/api/v1/exports/:id", delete(exports::delete_export))
        .route("/livez", get(health::livez))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-req-id",
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-req-id"),
            MakeRequestUuid,
        ))
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .with_state(state)
}

pub async fn run() -> Result<(), ExportError> {
    dotenv().ok();
    let config = Config::parse();
    init_tracing("media-exporter");

    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let worker_count = config.effective_workers(cpu_count);

    // One connection per worker at most; the headroom serves the admission
    // and listing path.
    let pool = create_pool_from_url(&config.data_source, worker_count + 4)?;
    run_migrations(&pool).await?;

    let redis = mx_common::cache::connect(
        &config.redis_addr,
        &config.redis_password,
        config.redis_db,
    )
    .await?;
    let cache = StatusCache::new(redis.clone());
    let queue = TaskQueue::new(redis);

    let resolver = ConsulResolver::new(&config.consul);
    let files: Arc<dyn FileService> = Arc::new(HttpFileService::new(resolver.clone()));
    let auth_provider: Arc<dyn AuthProvider> = Arc::new(HttpAuthProvider::new(resolver));

    let temp_dir = config.temp_dir();
    tokio::fs::create_dir_all(&temp_dir).await?;

    let state: SharedState = Arc::new(AppState {
        pool,
        cache,
        queue,
        files,
        auth: auth_provider,
        temp_dir,
        pdf_captions: config.pdf_captions,
    });

    let shutdown = CancellationToken::new();
    let workers = spawn_workers(state.clone(), worker_count, shutdown.clone());

    let consul_registry = Arc::new(ConsulRegistry::new(&config.consul, &config.id));
    consul_registry.register(&config.grpc_addr).await?;
    let check_loop = tokio::spawn({
        let registry = consul_registry.clone();
        let shutdown = shutdown.clone();
        async move { registry.run_check_loop(shutdown).await }
    });

    let listener = tokio::net::TcpListener::bind(&config.grpc_addr).await?;
    info!(
        addr = %config.grpc_addr,
        workers = worker_count,
        "media exporter listening"
    );

    let app = create_router(state);
    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .map_err(|err| ExportError::Internal(format!("server error: {err}")))?;

    // Workers finish at most their current task; the queue itself is durable
    // and keeps whatever was not picked up.
    for handle in workers {
        let _ = handle.await;
    }
    let _ = check_loop.await;

    if let Err(err) = consul_registry.deregister().await {
        warn!(error = %err, "deregistration failed");
    }

    info!("media exporter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
