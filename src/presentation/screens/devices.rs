use crate::domain::models::BluetoothCommand;
use crate::presentation::app::RemoteControlApp;
use crate::presentation::components::Components;
use eframe::egui;

pub fn render(app: &mut RemoteControlApp, ui: &mut egui::Ui) {
    Components::heading(ui, "BLE Remote Controller");
    ui.add_space(20.0);

    let mut connect_to = connection_panel(app, ui);
    ui.add_space(15.0);

    if let Some(address) = known_devices_panel(app, ui) {
        connect_to = Some(address);
    }

    if let Some(address) = connect_to {
        app.open_control_session(&address);
    }
}

/// Returns the address the user asked to connect to, if any
fn connection_panel(app: &mut RemoteControlApp, ui: &mut egui::Ui) -> Option<String> {
    let mut connect_to = None;

    Components::card(ui, "Connect", |ui| {
        ui.horizontal(|ui| {
            ui.label("Address:");
            ui.text_edit_singleline(&mut app.address_input);
        });

        ui.horizontal(|ui| {
            let address = app.address_input.trim();
            if ui
                .add_enabled(!address.is_empty(), egui::Button::new("Connect"))
                .clicked()
            {
                connect_to = Some(address.to_string());
            }

            if app.is_scanning {
                if ui.button("Stop Scan").clicked() {
                    app.is_scanning = false;
                    app.send(BluetoothCommand::StopScan);
                }
                ui.spinner();
            } else if ui.button("Scan for Devices").clicked() {
                app.is_scanning = true;
                app.scanned_devices.clear();
                app.send(BluetoothCommand::StartScan);
            }
        });

        if !app.scanned_devices.is_empty() {
            ui.separator();
            ui.label("Nearby Devices:");
            egui::ScrollArea::vertical()
                .id_salt("scan_results")
                .max_height(180.0)
                .show(ui, |ui| {
                    for device in &app.scanned_devices {
                        ui.horizontal(|ui| {
                            let rssi = device
                                .signal_strength
                                .map(|rssi| format!("{} dBm", rssi))
                                .unwrap_or_else(|| "?".to_string());
                            ui.label(format!("{} [{}] ({})", device.name, device.address, rssi));
                            if ui.button("Connect").clicked() {
                                connect_to = Some(device.address.clone());
                            }
                        });
                    }
                });
        }
    });

    connect_to
}

fn known_devices_panel(app: &mut RemoteControlApp, ui: &mut egui::Ui) -> Option<String> {
    let known = &app.settings.get().known_addresses;
    if known.is_empty() {
        return None;
    }

    let mut connect_to = None;
    Components::card(ui, "Known Devices", |ui| {
        for address in known {
            ui.horizontal(|ui| {
                ui.label(egui::RichText::new(address).monospace());
                if ui.button("Connect").clicked() {
                    connect_to = Some(address.clone());
                }
            });
        }
    });
    connect_to
}
