use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use lightkeeper::config::{CliArgs, LightkeeperConfig, APP_NAME, LOG_FILE_PREFIX};
use lightkeeper::notify::{LogSink, NotificationSink, SlackWebhookSink};
use lightkeeper::state::{AppState, SharedState};
use lightkeeper::store::db::SqliteStore;
use lightkeeper::{scheduler, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = LightkeeperConfig::from_args(args);

    // Stdout plus a daily rolling file. The guard flushes the file writer on exit.
    std::fs::create_dir_all(&config.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lightkeeper=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));
    info!("Database: {:?}", config.db_path);
    info!("Lighthouse binary: {}", config.lighthouse_bin);
    info!("Artifact dir: {:?}", config.artifact_dir);
    info!(
        "Audit timeout: {:?}, max concurrent: {}",
        config.audit_timeout, config.max_concurrent_audits
    );

    std::fs::create_dir_all(&config.artifact_dir)?;
    let store = Arc::new(SqliteStore::open(&config.db_path)?);

    let sink: Arc<dyn NotificationSink> = match config.slack_webhook.as_deref() {
        Some(url) => match SlackWebhookSink::new(url) {
            Ok(sink) => {
                info!("Slack notifications enabled");
                Arc::new(sink)
            }
            Err(e) => {
                warn!("Slack sink unavailable, falling back to log sink: {}", e);
                Arc::new(LogSink)
            }
        },
        None => Arc::new(LogSink),
    };

    let port = config.port;
    let schedule_interval = config.schedule_interval;
    let state: SharedState = Arc::new(AppState::new(config, store.clone(), sink));

    let scheduler_handle =
        schedule_interval.map(|every| scheduler::spawn_scheduler(state.clone(), every));

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    info!("Shutting down");
    state.begin_shutdown();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }
    }
    store.close()?;

    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
    // Wake in-flight batches so the server can drain.
    state.begin_shutdown();
}
