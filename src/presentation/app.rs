use crate::domain::models::{
    AppEvent, BluetoothCommand, MessageSeverity, ScannedDevice, SessionState, StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::service;
use crate::infrastructure::logging::LoggingGuard;
use crate::presentation::screens::control::{self, ControlSession};
use crate::presentation::screens::{devices, settings};
use crate::presentation::theme;
use eframe::egui;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Devices,
    Settings,
}

/// What the central panel shows
pub enum Screen {
    Browse(Tab),
    Control(ControlSession),
}

pub struct RemoteControlApp {
    pub(crate) settings: SettingsService,

    // Bluetooth
    pub(crate) bluetooth_tx: Option<mpsc::UnboundedSender<BluetoothCommand>>,
    events_rx: mpsc::UnboundedReceiver<AppEvent>,

    // State
    pub(crate) screen: Screen,
    pub(crate) status_message: Option<StatusMessage>,

    // Scanning
    pub(crate) is_scanning: bool,
    pub(crate) scanned_devices: Vec<ScannedDevice>,
    pub(crate) address_input: String,

    _logging_guard: Option<LoggingGuard>,
}

impl RemoteControlApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        settings: SettingsService,
        logging_guard: Option<LoggingGuard>,
    ) -> Self {
        theme::configure(&cc.egui_ctx);

        let (event_tx, events_rx) = mpsc::unbounded_channel();
        let mut status_message = None;
        let bluetooth_tx = match service::spawn(settings.get(), event_tx) {
            Ok(tx) => Some(tx),
            Err(e) => {
                error!("Failed to start Bluetooth service: {}", e);
                status_message = Some(StatusMessage::new(
                    format!("Bluetooth service not started: {}", e),
                    MessageSeverity::Error,
                ));
                None
            }
        };

        let address_input = settings
            .get()
            .last_connected_address
            .clone()
            .unwrap_or_default();

        Self {
            settings,
            bluetooth_tx,
            events_rx,
            screen: Screen::Browse(Tab::Devices),
            status_message,
            is_scanning: false,
            scanned_devices: Vec::new(),
            address_input,
            _logging_guard: logging_guard,
        }
    }

    pub(crate) fn send(&self, command: BluetoothCommand) {
        match &self.bluetooth_tx {
            Some(tx) => {
                if tx.send(command).is_err() {
                    warn!("Bluetooth thread is gone, dropping request");
                }
            }
            None => warn!("Bluetooth service not running, dropping {:?}", command),
        }
    }

    /// Start a session with `address` and switch to the control screen
    pub(crate) fn open_control_session(&mut self, address: &str) {
        let Some(tx) = self.bluetooth_tx.clone() else {
            self.status_message = Some(StatusMessage::new(
                "Bluetooth service not running",
                MessageSeverity::Error,
            ));
            return;
        };
        // Connecting stops any scan in progress
        self.is_scanning = false;
        info!("Opening control session for {}", address.trim());
        self.screen = Screen::Control(ControlSession::open(address, tx));
    }

    pub(crate) fn control_session_mut(&mut self) -> Option<&mut ControlSession> {
        match &mut self.screen {
            Screen::Control(session) => Some(session),
            Screen::Browse(_) => None,
        }
    }

    /// Leave the control screen, tearing its session down
    pub(crate) fn close_control_session(&mut self) {
        let previous = std::mem::replace(&mut self.screen, Screen::Browse(Tab::Devices));
        if let Screen::Control(session) = previous {
            info!("Leaving control session for {}", session.address());
            session.leave();
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::SessionState(state) => {
                let mut ready_address = None;
                if let Some(session) = self.control_session_mut() {
                    if state.is_ready() {
                        ready_address = Some(session.address().to_string());
                    }
                    session.state = state;
                }
                if let Some(address) = ready_address {
                    if let Err(e) = self.settings.remember_address(&address) {
                        warn!("Failed to save settings: {}", e);
                    }
                }
            }
            AppEvent::Telemetry(text) => {
                if let Some(session) = self.control_session_mut() {
                    session.telemetry = text;
                }
            }
            AppEvent::StartStopLabel(label) => {
                if let Some(session) = self.control_session_mut() {
                    session.start_stop_label = label;
                }
            }
            AppEvent::LogMessage(msg) => self.status_message = Some(msg),
            AppEvent::DeviceFound(device) => {
                if let Some(existing) = self
                    .scanned_devices
                    .iter_mut()
                    .find(|d| d.address == device.address)
                {
                    *existing = device;
                } else {
                    self.scanned_devices.push(device);
                }
            }
        }
    }

    fn render_status(&self, ui: &mut egui::Ui) {
        let Some(status) = &self.status_message else {
            return;
        };
        ui.label(
            egui::RichText::new(&status.message)
                .color(theme::severity_color(status.severity))
                .strong(),
        );
    }
}

impl eframe::App for RemoteControlApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }

        ctx.request_repaint();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| match &mut self.screen {
                Screen::Browse(tab) => {
                    ui.selectable_value(tab, Tab::Devices, "Devices");
                    ui.selectable_value(tab, Tab::Settings, "Settings");
                }
                Screen::Control(session) => {
                    let state = match &session.state {
                        SessionState::Reconnecting(fault) | SessionState::Failed(fault) => {
                            format!("{}", fault)
                        }
                        other => format!("{:?}", other),
                    };
                    ui.label(egui::RichText::new(state).strong());
                }
            });
        });

        egui::TopBottomPanel::bottom("status_panel").show(ctx, |ui| {
            self.render_status(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.vertical_centered(|ui| {
                    ui.set_max_width(640.0);
                    ui.add_space(20.0);

                    let tab = match &self.screen {
                        Screen::Browse(tab) => Some(*tab),
                        Screen::Control(_) => None,
                    };
                    match tab {
                        Some(Tab::Devices) => devices::render(self, ui),
                        Some(Tab::Settings) => settings::render(self, ui),
                        None => control::render(self, ui),
                    }

                    ui.add_space(40.0);
                });
            });
        });
    }

}

impl Drop for RemoteControlApp {
    fn drop(&mut self) {
        self.close_control_session();
    }
}
