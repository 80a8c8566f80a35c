//! Bluetooth Service Module
//!
//! Event loop that owns the session controller. UI requests, transport
//! completions and timer expirations all arrive over channels and are
//! handled one at a time on a single-threaded runtime.

use crate::domain::models::{AppEvent, BluetoothCommand, MessageSeverity, StatusMessage};
use crate::domain::session::{Scheduler, SessionController, TimerId};
use crate::domain::settings::{SessionConfig, Settings};
use crate::domain::transport::{Transport, TransportEvent};
use crate::infrastructure::bluetooth::{
    connection::{BtleplugTransport, ConnectionConfig},
    scanner::BleScanner,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timers backed by tokio sleeps; expiry is sent back into the event loop
pub struct TokioScheduler {
    timer_sender: mpsc::UnboundedSender<TimerId>,
    handles: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(timer_sender: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            timer_sender,
            handles: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, timer: TimerId, after: Duration) {
        self.handles.retain(|_, handle| !handle.is_finished());
        let sender = self.timer_sender.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = sender.send(timer);
        });
        self.handles.insert(timer, handle);
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(handle) = self.handles.remove(&timer) {
            handle.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

/// Main Bluetooth service coordinating scanning and the control session
pub struct BluetoothService<T: Transport> {
    controller: SessionController<T, TokioScheduler>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    timer_events: mpsc::UnboundedReceiver<TimerId>,
    scanner: Option<BleScanner>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    config: SessionConfig,
    show_all_devices: bool,
}

impl<T: Transport> BluetoothService<T> {
    /// Create a new Bluetooth service
    ///
    /// `transport_events` must be the receiving end of the channel the
    /// transport reports into.
    pub fn new(
        transport: T,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let controller = SessionController::new(
            transport,
            TokioScheduler::new(timer_tx),
            config.clone(),
            event_sender.clone(),
        );

        Self {
            controller,
            transport_events,
            timer_events: timer_rx,
            scanner: None,
            event_sender,
            config,
            show_all_devices: false,
        }
    }

    pub fn with_scanner(mut self, scanner: BleScanner, show_all_devices: bool) -> Self {
        self.scanner = Some(scanner);
        self.show_all_devices = show_all_devices;
        self
    }

    /// Process events until the command channel closes
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.transport_events.recv() => {
                    self.controller.handle_transport_event(event);
                }
                Some(timer) = self.timer_events.recv() => {
                    self.controller.handle_timer(timer);
                }
            }
        }

        info!("Command channel closed, shutting down Bluetooth service");
        if let Some(scanner) = self.scanner.as_mut() {
            scanner.stop();
        }
        self.controller.leave();
    }

    fn handle_command(&mut self, command: BluetoothCommand) {
        match command {
            BluetoothCommand::StartScan => match self.scanner.as_mut() {
                Some(scanner) if scanner.is_scanning() => debug!("Scan already running"),
                Some(scanner) => scanner.start(self.config.service_uuid, self.show_all_devices),
                None => warn!("Scanning is not available"),
            },
            BluetoothCommand::StopScan => {
                if let Some(scanner) = self.scanner.as_mut() {
                    scanner.stop();
                }
            }
            BluetoothCommand::Connect(address) => {
                // Scanning competes with the connection for the radio
                if let Some(scanner) = self.scanner.as_mut() {
                    scanner.stop();
                }
                if let Err(e) = self.controller.connect(&address) {
                    warn!("Connect request rejected: {}", e);
                    self.send_log(format!("Cannot connect: {}", e), MessageSeverity::Warning);
                }
            }
            BluetoothCommand::Press(command) => self.controller.press(command),
            BluetoothCommand::Release => self.controller.release(),
            BluetoothCommand::Leave => self.controller.leave(),
        }
    }

    fn send_log(&self, message: String, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

/// Run the Bluetooth service on its own thread with a current-thread runtime
///
/// Returns the sender the UI uses to drive the session.
pub fn spawn(
    settings: &Settings,
    event_sender: mpsc::UnboundedSender<AppEvent>,
) -> anyhow::Result<mpsc::UnboundedSender<BluetoothCommand>> {
    let config = settings.session_config()?;
    let show_all_devices = settings.debug_show_all_devices;
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("bluetooth".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime for Bluetooth: {}", e);
                    return;
                }
            };

            rt.block_on(async move {
                let (transport_tx, transport_rx) = mpsc::unbounded_channel();
                let transport =
                    match BtleplugTransport::new(transport_tx, ConnectionConfig::default()).await {
                        Ok(transport) => transport,
                        Err(e) => {
                            error!("Bluetooth unavailable: {}", e);
                            let _ = event_sender.send(AppEvent::LogMessage(StatusMessage::new(
                                format!("Bluetooth unavailable: {}", e),
                                MessageSeverity::Error,
                            )));
                            return;
                        }
                    };

                let scanner = BleScanner::new(transport.adapter(), event_sender.clone());
                BluetoothService::new(transport, transport_rx, config, event_sender)
                    .with_scanner(scanner, show_all_devices)
                    .run(command_rx)
                    .await;
            });
        })?;

    Ok(command_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::Command;
    use crate::domain::models::SessionState;
    use crate::domain::transport::{
        LinkId, LinkState, ServiceTable, TransportError, TransportEventKind,
    };
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;
    use uuid::Uuid;

    const ADDRESS: &str = "C8:2B:96:11:22:33";

    #[derive(Default)]
    struct Record {
        connects: Vec<Instant>,
        writes: Vec<(Instant, char)>,
        disconnects: usize,
    }

    /// Peripheral that answers every request on the spot
    struct LoopbackTransport {
        events: mpsc::UnboundedSender<TransportEvent>,
        link: Option<LinkId>,
        fail_writes: bool,
        record: Arc<Mutex<Record>>,
    }

    impl LoopbackTransport {
        fn send(&self, kind: TransportEventKind) {
            if let Some(link) = self.link {
                let _ = self.events.send(TransportEvent::new(link, kind));
            }
        }
    }

    impl Transport for LoopbackTransport {
        fn connect(&mut self, link: LinkId, _address: &str) {
            self.link = Some(link);
            self.record.lock().unwrap().connects.push(Instant::now());
            self.send(TransportEventKind::ConnectionStateChanged(
                LinkState::Connected,
            ));
        }

        fn discover_services(&mut self) {
            let config = SessionConfig::default();
            let table =
                ServiceTable::new().with_service(config.service_uuid, [config.control_char_uuid]);
            self.send(TransportEventKind::ServicesDiscovered(Ok(table)));
        }

        fn set_notification(&mut self, _characteristic: Uuid, _enabled: bool) {}

        fn write_characteristic(
            &mut self,
            _characteristic: Uuid,
            value: u8,
        ) -> Result<(), TransportError> {
            self.record
                .lock()
                .unwrap()
                .writes
                .push((Instant::now(), value as char));
            let result = if self.fail_writes {
                Err(TransportError::Stack("write rejected".to_string()))
            } else {
                Ok(())
            };
            self.send(TransportEventKind::WriteComplete(result));
            Ok(())
        }

        fn disconnect(&mut self) {
            self.link = None;
            self.record.lock().unwrap().disconnects += 1;
        }
    }

    struct Harness {
        commands: mpsc::UnboundedSender<BluetoothCommand>,
        events: mpsc::UnboundedReceiver<AppEvent>,
        record: Arc<Mutex<Record>>,
    }

    fn start(fail_writes: bool) -> Harness {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let record = Arc::new(Mutex::new(Record::default()));

        let transport = LoopbackTransport {
            events: transport_tx,
            link: None,
            fail_writes,
            record: record.clone(),
        };
        let service =
            BluetoothService::new(transport, transport_rx, SessionConfig::default(), event_tx);
        tokio::spawn(service.run(command_rx));

        Harness {
            commands: command_tx,
            events: event_rx,
            record,
        }
    }

    async fn wait_for_state(events: &mut mpsc::UnboundedReceiver<AppEvent>, wanted: SessionState) {
        while let Some(event) = events.recv().await {
            if event == AppEvent::SessionState(wanted.clone()) {
                return;
            }
        }
        panic!("event channel closed before reaching {:?}", wanted);
    }

    fn offsets_ms(times: &[Instant], origin: Instant) -> Vec<u128> {
        times
            .iter()
            .map(|t| t.duration_since(origin).as_millis())
            .collect()
    }

    fn assert_near(actual: &[u128], expected: &[u128]) {
        assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
        for (a, e) in actual.iter().zip(expected) {
            assert!(*a >= *e && *a <= *e + 5, "{:?} vs {:?}", actual, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_command_repeats_every_interval() {
        let mut harness = start(false);
        harness
            .commands
            .send(BluetoothCommand::Connect(ADDRESS.to_string()))
            .unwrap();
        wait_for_state(&mut harness.events, SessionState::Ready).await;

        let pressed_at = Instant::now();
        harness
            .commands
            .send(BluetoothCommand::Press(Command::Forward))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        harness.commands.send(BluetoothCommand::Release).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let record = harness.record.lock().unwrap();
        let chars: String = record.writes.iter().map(|(_, c)| *c).collect();
        assert_eq!(chars, "FFFF");
        let times: Vec<Instant> = record.writes.iter().map(|(t, _)| *t).collect();
        assert_near(&offsets_ms(&times, pressed_at), &[0, 100, 200, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_saturation_reconnects_after_delay() {
        let mut harness = start(true);
        harness
            .commands
            .send(BluetoothCommand::Connect(ADDRESS.to_string()))
            .unwrap();
        wait_for_state(&mut harness.events, SessionState::Ready).await;

        let pressed_at = Instant::now();
        harness
            .commands
            .send(BluetoothCommand::Press(Command::Up))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(6000)).await;

        let record = harness.record.lock().unwrap();
        assert_eq!(record.writes.len(), 3);
        assert_eq!(record.disconnects, 1);
        assert_near(
            &offsets_ms(&record.connects[1..], pressed_at),
            &[200 + 5000],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_tears_down_session() {
        let mut harness = start(false);
        harness
            .commands
            .send(BluetoothCommand::Connect(ADDRESS.to_string()))
            .unwrap();
        wait_for_state(&mut harness.events, SessionState::Ready).await;

        harness
            .commands
            .send(BluetoothCommand::Press(Command::Left))
            .unwrap();
        harness.commands.send(BluetoothCommand::Leave).unwrap();
        wait_for_state(&mut harness.events, SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let record = harness.record.lock().unwrap();
        assert_eq!(record.writes.len(), 1);
        assert_eq!(record.disconnects, 1);
        assert_eq!(record.connects.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_connect_is_reported() {
        let mut harness = start(false);
        harness
            .commands
            .send(BluetoothCommand::Connect("   ".to_string()))
            .unwrap();

        match harness.events.recv().await {
            Some(AppEvent::LogMessage(msg)) => {
                assert_eq!(msg.severity, MessageSeverity::Warning);
                assert!(msg.message.contains("address is empty"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
