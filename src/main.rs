mod api;
mod config;
mod error;
mod models;
mod services;

use std::sync::Arc;

use axum::http::{header, Method};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::Config;
use crate::services::analyzers::{OnsetClient, PitchBAnalyzer};
use crate::services::{BulkLoader, MetadataLog, Orchestrator, RecordingStateStore};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,violin_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("configuration loaded");

    let blocking_threads = config
        .analyzer_worker_threads
        .unwrap_or_else(|| std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4) * 2);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(blocking_threads)
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let db = PgPoolOptions::new()
        .max_connections(50)
        .connect(&config.database_url)
        .await?;
    tracing::info!("connected to database");

    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("database migrations completed");

    let loader = BulkLoader::new(db.clone());
    let metadata_log = MetadataLog::spawn(loader.clone());

    tracing::info!(path = ?config.pitch_model_path, "loading pitch-b model");
    let pool_size = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4).min(4);
    let pitch_b = Arc::new(PitchBAnalyzer::load(&config.pitch_model_path, pool_size)?);
    pitch_b.prewarm().await?;
    tracing::info!("pitch-b model warmed up");

    let onset = OnsetClient::new(&config.onset_service_host, config.onset_service_port);

    std::fs::create_dir_all(&config.working_dir)?;

    let store = Arc::new(RecordingStateStore::new());
    let cancellation = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        loader.clone(),
        metadata_log.clone(),
        pitch_b,
        onset,
        config.working_dir.clone(),
        config.tick_interval_ms,
        cancellation.clone(),
    ));
    let orchestrator_handle = tokio::spawn(orchestrator.run());

    let app_state = AppState {
        store: Arc::clone(&store),
        started_at: chrono::Utc::now(),
        cancellation: cancellation.clone(),
    };

    let app = Router::new()
        .merge(api::stream_routes())
        .merge(api::health_routes())
        .with_state(app_state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        );

    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!(addr, "starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancellation))
        .await?;

    orchestrator_handle.await.ok();

    Ok(())
}

async fn shutdown_signal(cancellation: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    cancellation.cancel();
}
