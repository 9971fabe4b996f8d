use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("notreallyd starting");

    let config = config::Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        db = %config.db_path.display(),
        model = %config.model_path.display(),
        uploads = %config.upload_dir.display(),
        frame_stride = config.frame_stride,
        blink_threshold = config.blink_threshold,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("failed to start analysis engine")?;

    let store = store::SqliteJobStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open job store {}", config.db_path.display()))?;

    let interrupted = store
        .count_by_status(notreally_core::JobStatus::Processing)
        .await
        .context("failed to read job store")?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "jobs left processing by a previous run");
    }

    std::fs::create_dir_all(&config.upload_dir).with_context(|| {
        format!("failed to create upload dir {}", config.upload_dir.display())
    })?;

    let state = http::AppState {
        engine,
        store,
        upload_dir: config.upload_dir.clone(),
    };
    let app = http::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "notreallyd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    tracing::info!("notreallyd shutting down");
    Ok(())
}
