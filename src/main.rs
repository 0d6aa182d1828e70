use ardubot_controller::domain::settings::SettingsService;
use ardubot_controller::infrastructure::bluetooth::btleplug_transport::BtleplugConfig;
use ardubot_controller::infrastructure::bluetooth::{BluetoothService, BtleplugTransport};
use ardubot_controller::infrastructure::logging;
use ardubot_controller::presentation::app::ControllerApp;
use eframe::egui;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!("Starting Ardubot Controller");

    // Leave an editable settings file behind on first run
    if !settings_service.path().exists() {
        if let Err(e) = settings_service.save() {
            tracing::warn!("Could not write default settings: {}", e);
        }
    }

    let transport = Arc::new(BtleplugTransport::new(BtleplugConfig::from_settings(
        &settings,
    )));
    let bluetooth = BluetoothService::new(transport, &settings)?;
    if settings.auto_connect {
        bluetooth.request_connect();
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([380.0, 460.0])
            .with_title(format!("{} BLE Controller", settings.device_name)),
        ..Default::default()
    };

    eframe::run_native(
        "Ardubot Controller",
        options,
        Box::new(|cc| Ok(Box::new(ControllerApp::new(cc, bluetooth, logging_guard)))),
    )
    .map_err(|e| anyhow::anyhow!("UI error: {}", e))
}
