//! Control pad screen
//!
//! Owns the UI side of one session: created by the device screen when the
//! user picks a peripheral, dropped when the user navigates back.

use crate::domain::command::Command;
use crate::domain::models::{BluetoothCommand, SessionState};
use crate::presentation::app::RemoteControlApp;
use crate::presentation::components::Components;
use crate::presentation::theme;
use eframe::egui;
use tokio::sync::mpsc;
use tracing::warn;

const BUTTON_SIZE: [f32; 2] = [110.0, 64.0];

const PAD_COLUMNS: usize = 4;

pub struct ControlSession {
    address: String,
    commands: mpsc::UnboundedSender<BluetoothCommand>,
    pub state: SessionState,
    /// Last notification received, replaced on every update
    pub telemetry: String,
    pub start_stop_label: &'static str,
    held: Option<Command>,
}

impl ControlSession {
    /// Ask the Bluetooth thread to connect and hand back the session handle
    pub fn open(address: &str, commands: mpsc::UnboundedSender<BluetoothCommand>) -> Self {
        let session = Self {
            address: address.trim().to_string(),
            commands,
            state: SessionState::Connecting,
            telemetry: String::new(),
            start_stop_label: "Start",
            held: None,
        };
        session.send(BluetoothCommand::Connect(session.address.clone()));
        session
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn held(&self) -> Option<Command> {
        self.held
    }

    /// Reconcile the control under the pointer with what is currently held
    pub fn sync_pointer(&mut self, down: Option<Command>) {
        match (self.held, down) {
            (None, Some(command)) => {
                self.held = Some(command);
                self.send(BluetoothCommand::Press(command));
            }
            (Some(_), None) => {
                self.held = None;
                self.send(BluetoothCommand::Release);
            }
            (Some(held), Some(command)) if held != command => {
                self.send(BluetoothCommand::Release);
                self.held = Some(command);
                self.send(BluetoothCommand::Press(command));
            }
            _ => {}
        }
    }

    /// Tear the session down; the handle is consumed
    pub fn leave(self) {
        self.send(BluetoothCommand::Leave);
    }

    fn send(&self, command: BluetoothCommand) {
        if self.commands.send(command).is_err() {
            warn!("Bluetooth thread is gone, dropping request");
        }
    }
}

pub fn render(app: &mut RemoteControlApp, ui: &mut egui::Ui) {
    let mut back = false;

    if let Some(session) = app.control_session_mut() {
        ui.horizontal(|ui| {
            if ui.button("⬅ Back").clicked() {
                back = true;
            }
            Components::heading(ui, &format!("Controller · {}", session.address()));
        });
        ui.add_space(10.0);

        let (text, bg, fg) = theme::state_banner(&session.state);
        Components::status_banner(ui, text, bg, fg);
        ui.add_space(10.0);

        let enabled = session.state.is_ready();
        let mut down = None;

        Components::card(ui, "Controls", |ui| {
            egui::Grid::new("control_pad")
                .spacing([12.0, 12.0])
                .show(ui, |ui| {
                    let movement = Command::ALL
                        .into_iter()
                        .filter(|command| *command != Command::StartStop);
                    for (index, command) in movement.enumerate() {
                        if index > 0 && index % PAD_COLUMNS == 0 {
                            ui.end_row();
                        }
                        if pad_button(ui, command.label(), enabled) {
                            down = Some(command);
                        }
                    }
                    ui.end_row();
                });

            ui.add_space(8.0);
            if pad_button(ui, session.start_stop_label, enabled) {
                down = Some(Command::StartStop);
            }
        });

        session.sync_pointer(down);
        ui.add_space(10.0);

        Components::card(ui, "Telemetry", |ui| {
            let text = if session.telemetry.is_empty() {
                "—"
            } else {
                session.telemetry.as_str()
            };
            ui.label(egui::RichText::new(text).monospace().size(28.0));
        });
    }

    if back {
        app.close_control_session();
    }
}

/// Returns whether the pointer is currently held down on the button
fn pad_button(ui: &mut egui::Ui, caption: &str, enabled: bool) -> bool {
    let response = ui.add_enabled(
        enabled,
        egui::Button::new(egui::RichText::new(caption).strong()).min_size(BUTTON_SIZE.into()),
    );
    response.is_pointer_button_down_on()
}
