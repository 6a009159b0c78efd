use clap::Parser;
use gln_core::{ActivityIndicator, NotificationSink, SettingsProvider};
use gln_listener::config::{Args, RuntimeConfig};
use gln_listener::logging::init_logging;
use gln_listener::notifier::{CommandNotifier, LogIndicator, LogNotifier, StatusFileIndicator};
use gln_listener::settings::FileSettings;
use gln_listener::{Supervisor, WsConnector};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = RuntimeConfig::from_env(&args);
    let _log_guard = init_logging(&config.log);

    let settings: Arc<dyn SettingsProvider> = Arc::new(FileSettings::new(
        config.settings_path.clone(),
        config.overrides.clone(),
    ));
    let sink: Arc<dyn NotificationSink> = match config
        .notify_command
        .as_deref()
        .and_then(CommandNotifier::parse)
    {
        Some(command) => Arc::new(command),
        None => Arc::new(LogNotifier),
    };
    let indicator: Arc<dyn ActivityIndicator> = match &config.indicator_file {
        Some(path) => Arc::new(StatusFileIndicator::new(path.clone())),
        None => Arc::new(LogIndicator),
    };

    info!(
        event = "listener_start",
        settings = %config.settings_path.display(),
        backoff_ms = config.supervisor.backoff.as_millis() as u64,
        probe_interval_secs = config.transport.probe_interval.as_secs()
    );

    let mut supervisor = Supervisor::new(
        WsConnector::new(config.transport),
        settings,
        sink,
        indicator,
        config.supervisor,
    );
    supervisor.start().await?;

    tokio::select! {
        _ = shutdown_signal() => info!(event = "listener_shutdown_signal"),
        _ = supervisor.stopped() => {}
    }
    supervisor.stop().await;

    let snapshot = supervisor.snapshot();
    info!(
        event = "listener_exit",
        stats = ?snapshot.stats,
        dispatch = ?supervisor.dispatch_stats()
    );
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(event = "signal_install_failed", error = %err);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(event = "signal_install_failed", error = %err);
    }
}
