mod domain;
mod infrastructure;
mod presentation;

use domain::settings::SettingsService;
use eframe::egui;
use infrastructure::logging;
use presentation::app::RemoteControlApp;
use tracing::info;

fn main() -> Result<(), eframe::Error> {
    let settings = SettingsService::new().unwrap_or_else(|e| {
        eprintln!("Failed to locate config directory, using ./settings.json: {}", e);
        SettingsService::with_path("settings.json".into())
    });

    let logging_guard = logging::init_logger(&settings.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting BLE Remote Controller");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([720.0, 640.0])
            .with_title("BLE Remote Controller"),
        ..Default::default()
    };

    eframe::run_native(
        "BLE Remote Controller",
        options,
        Box::new(move |cc| Ok(Box::new(RemoteControlApp::new(cc, settings, logging_guard)))),
    )
}
