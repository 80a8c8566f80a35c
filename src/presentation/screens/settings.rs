use crate::presentation::app::RemoteControlApp;
use crate::presentation::components::Components;
use eframe::egui;
use tracing::{info, warn};

pub fn render(app: &mut RemoteControlApp, ui: &mut egui::Ui) {
    Components::heading(ui, "Settings");
    ui.add_space(20.0);

    let settings = app.settings.get_mut();

    Components::card(ui, "Session", |ui| {
        egui::Grid::new("session_timing")
            .spacing([10.0, 10.0])
            .show(ui, |ui| {
                ui.label("Repeat interval (ms):");
                ui.add(egui::DragValue::new(&mut settings.repeat_interval_ms).range(20..=1000));
                ui.end_row();
                ui.label("Reconnect delay (ms):");
                ui.add(
                    egui::DragValue::new(&mut settings.reconnect_delay_ms).range(500..=60_000),
                );
                ui.end_row();
                ui.label("Write failures before reset:");
                ui.add(egui::DragValue::new(&mut settings.max_write_failures).range(1..=20));
                ui.end_row();
            });
    });

    ui.add_space(10.0);

    Components::card(ui, "Bluetooth", |ui| {
        ui.checkbox(
            &mut settings.debug_show_all_devices,
            "List every device while scanning",
        );

        ui.collapsing("Override UUIDs", |ui| {
            ui.label(
                egui::RichText::new("Changing these breaks discovery of stock firmware.")
                    .color(egui::Color32::from_rgb(255, 200, 0)),
            );
            egui::Grid::new("ble_uuids")
                .spacing([10.0, 10.0])
                .show(ui, |ui| {
                    ui.label("Service:");
                    ui.text_edit_singleline(&mut settings.ble_service_uuid);
                    ui.end_row();
                    ui.label("Control:");
                    ui.text_edit_singleline(&mut settings.ble_control_char_uuid);
                    ui.end_row();
                });
        });
    });

    ui.add_space(10.0);

    Components::card(ui, "Logging", |ui| {
        ui.horizontal(|ui| {
            ui.label("Level:");
            egui::ComboBox::from_id_salt("log_level")
                .selected_text(&settings.log_settings.level)
                .show_ui(ui, |ui| {
                    for level in ["trace", "debug", "info", "warn", "error"] {
                        ui.selectable_value(
                            &mut settings.log_settings.level,
                            level.to_string(),
                            level,
                        );
                    }
                });
        });
        ui.checkbox(
            &mut settings.log_settings.console_logging_enabled,
            "Console logs",
        );
        ui.checkbox(&mut settings.log_settings.file_logging_enabled, "File logs");
        if settings.log_settings.file_logging_enabled {
            ui.indent("file_logs", |ui| {
                ui.horizontal(|ui| {
                    ui.label("Directory:");
                    ui.text_edit_singleline(&mut settings.log_settings.log_dir);
                });
            });
        }
    });

    ui.add_space(10.0);

    let config_valid = app.settings.get().session_config().is_ok();
    ui.horizontal(|ui| {
        if ui
            .add_enabled(config_valid, egui::Button::new("Save"))
            .clicked()
        {
            match app.settings.save() {
                Ok(()) => info!("Settings saved"),
                Err(e) => warn!("Failed to save settings: {}", e),
            }
        }
        if !config_valid {
            ui.label(egui::RichText::new("Invalid UUID").color(egui::Color32::RED));
        }
    });
    ui.label(
        egui::RichText::new("Changes take effect after restart.")
            .italics()
            .size(12.0),
    );
}
