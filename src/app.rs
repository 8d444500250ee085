//! Wiring of settings, BLE source, OSC sink, device history and console

use crate::domain::registry::DeviceHistoryStore;
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::connection::ConnectionConfig;
use crate::infrastructure::bluetooth::BluetoothService;
use crate::infrastructure::osc::OscEmitter;
use crate::presentation::console::{self, ConsoleSelector};
use crate::session::{DeviceSession, SessionExit, Shutdown, ShutdownTrigger};
use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn watch_ctrl_c(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received, shutting down");
                trigger.trigger();
            }
            Err(e) => {
                warn!("Unable to listen for Ctrl+C: {}", e);
                // Dropping the trigger would read as a shutdown request
                std::future::pending::<()>().await;
            }
        }
    });
}

pub async fn run(service: SettingsService) -> anyhow::Result<()> {
    let settings = service.get();
    let config = settings.session_config();

    let target = settings.osc_target();
    let emitter =
        OscEmitter::new(&target).with_context(|| format!("Failed to open OSC socket for {}", target))?;
    let registry = DeviceHistoryStore::open(service.device_history_path());
    let source = BluetoothService::new(ConnectionConfig::default(), config.preset_address.clone());

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(console::print_events(event_rx));

    let (trigger, shutdown) = Shutdown::channel();
    watch_ctrl_c(trigger);

    let mut session = DeviceSession::new(
        config,
        Box::new(source),
        Box::new(ConsoleSelector::stdin()),
        Box::new(emitter),
        Box::new(registry),
        event_tx,
        shutdown,
    );

    let exit = session.run().await;
    drop(session);
    let _ = printer.await;

    match exit {
        SessionExit::Shutdown => info!("Stopped"),
        SessionExit::Cancelled => info!("Device selection cancelled, exiting"),
    }
    Ok(())
}
