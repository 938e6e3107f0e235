use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use tutorslot::config::Settings;
use tutorslot::directory::{Directory, StaticDirectory};
use tutorslot::engine::{Engine, EngineContext};
use tutorslot::http::{self, AppState};
use tutorslot::limits::OUTBOX_CAPACITY;
use tutorslot::notify::{self, LogNotifier, Notifier, Outbox, WebhookNotifier};
use tutorslot::{observability, sweeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    observability::init_tracing(settings.observability.json_logs);
    observability::init(settings.observability.metrics_port)?;

    std::fs::create_dir_all(&settings.storage.data_dir)?;

    let directory: Arc<dyn Directory> = match &settings.directory.path {
        Some(path) => Arc::new(StaticDirectory::load(path)?),
        None => {
            tracing::warn!("no directory file configured, every room lookup will fail");
            Arc::new(StaticDirectory::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match (&settings.notifier.webhook_url, &settings.notifier.webhook_token) {
        (Some(url), Some(token)) => Arc::new(WebhookNotifier::new(
            url.clone(),
            token.clone(),
            settings.notifier_timeout(),
        )?),
        _ => {
            info!("no notification webhook configured, messages go to the log");
            Arc::new(LogNotifier)
        }
    };
    let (outbox, outbox_rx) = Outbox::channel(OUTBOX_CAPACITY);
    let dispatcher = tokio::spawn(notify::run_dispatcher(outbox_rx, notifier));

    let ctx = EngineContext::new(directory, outbox)
        .with_public_url(&settings.server.public_url)
        .with_booking_ttl(settings.booking_ttl_ms());
    let engine = Arc::new(Engine::new(settings.wal_path(), ctx)?);

    let sweeper_task = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        settings.sweep_interval(),
        settings.sweeper.batch_size,
    ));
    let compactor_task = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        settings.storage.compact_threshold,
    ));

    let state = AppState {
        engine: engine.clone(),
        sweep_secret: settings.sweeper.secret.as_deref().map(Arc::from),
        sweep_batch: settings.sweeper.batch_size,
    };

    let addr = settings.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("tutorslot listening on {addr}");
    info!("  data_dir: {}", settings.storage.data_dir.display());
    info!("  public_url: {}", settings.server.public_url);
    info!("  max_connections: {}", settings.server.max_connections);
    info!("  sweep: every {}s, batch {}", settings.sweeper.interval_secs, settings.sweeper.batch_size);
    info!("  cron endpoint: {}", if state.sweep_secret.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        settings
            .observability
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    http::serve(listener, state, settings.server.max_connections, shutdown_signal()).await?;

    // Stop background work, then let queued notifications drain.
    sweeper_task.abort();
    compactor_task.abort();
    drop(engine);
    let drain = tokio::time::timeout(std::time::Duration::from_secs(10), dispatcher).await;
    if drain.is_err() {
        tracing::warn!("notification drain timed out");
    }

    info!("tutorslot stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
