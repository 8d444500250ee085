mod app;
mod domain;
mod infrastructure;
mod presentation;
mod session;

use anyhow::Context;
use domain::settings::SettingsService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service = SettingsService::new()?;

    let _logging_guard = infrastructure::logging::init_logger(&service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!("Starting Bluetooth heart rate OSC bridge");
    service
        .get()
        .validate()
        .with_context(|| format!("Invalid settings ({})", service.path().display()))?;

    presentation::console::print_banner(service.get(), service.path());
    app::run(service).await
}
