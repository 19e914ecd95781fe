//! plugwatch daemon
//!
//! Watches for autopilot boards being plugged in and opens a serial session
//! with them once they have finished enumerating.

mod block;
mod error;
mod session;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use plugwatch_auto::{AutoConnectController, AutoConnectEvent, ConnectFailure};
use plugwatch_detect::{
    DeviceChangeKind, DeviceChangeSource, PortEnumerator, PortMonitor, PortScanner, ScannerConfig,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use block::BlockFile;
use session::SerialSession;
use settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "plugwatch=info,plugwatch_detect=info,plugwatch_auto=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting plugwatch");

    let settings = Settings::load_or_create();

    let scanner: Arc<dyn PortEnumerator> = Arc::new(PortScanner::with_config(ScannerConfig {
        skip_patterns: settings.skip_patterns.clone(),
    }));
    let monitor = Arc::new(PortMonitor::start(
        scanner.clone(),
        Duration::from_millis(settings.poll_interval_ms),
    ));

    let session = SerialSession::new(scanner.clone(), settings.baud_rate, Handle::current());
    let block = BlockFile::new(settings.block_file.clone());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let connected = session.clone();
    let connector = session.clone();
    let controller = AutoConnectController::builder()
        .is_connected(move || connected.is_connected())
        .should_block(move || block.should_block())
        .connect(move || connector.connect().map_err(ConnectFailure::from))
        .notifier(monitor.clone())
        .enumerator(scanner)
        .config(settings.auto_connect.clone())
        .events(event_tx)
        .build()
        .context("Failed to build auto-connect controller")?;

    // A closed session lets the next plug event connect again
    let on_closed = controller.clone();
    session.set_on_closed(move |port| {
        debug!(port = %port, "Session closed, resetting auto-connect");
        on_closed.reset_state();
    });

    let detach_watch = session.clone();
    let detach_subscription = monitor.subscribe(Arc::new(move |kind| {
        if kind == DeviceChangeKind::Removed {
            detach_watch.close_if_detached();
        }
    }));

    if !controller.is_enabled() {
        info!(
            "Auto-connect is disabled; set auto_connect.enabled in the settings file to turn it on"
        );
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            Some(event) = event_rx.recv() => log_event(&event),
        }
    }

    info!("Shutting down");
    controller.set_enabled(false);
    monitor.unsubscribe(detach_subscription);
    monitor.stop();
    session.close();

    Ok(())
}

fn log_event(event: &AutoConnectEvent) {
    match event {
        AutoConnectEvent::Enabled => info!("Auto-connect enabled"),
        AutoConnectEvent::Disabled => info!("Auto-connect disabled"),
        AutoConnectEvent::ArrivalIgnored { reason } => {
            debug!(reason = ?reason, "Device arrival ignored")
        }
        AutoConnectEvent::AttemptStarted { origin, port } => {
            info!(%origin, port = %port, "Auto-connect attempt started")
        }
        AutoConnectEvent::AttemptFinished { origin, outcome } => {
            debug!(%origin, outcome = ?outcome, "Auto-connect attempt finished")
        }
        AutoConnectEvent::GuardReset { was_held } => {
            debug!(was_held, "Auto-connect state reset")
        }
    }
}
