//! Session State Machine
//!
//! Owns the connect → discover → subscribe → ready lifecycle, the write queue
//! and the command repeater. Every input (UI request, transport event, timer
//! expiry) is a plain method call made from one event loop, so no state here
//! is shared across threads.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──Connected──▶ ServicesDiscovering
//!                               ▲                            │
//!                               │                 found ─────┴───── missing
//!                         reconnect timer           │                 │
//!                               │                   ▼                 ▼
//!                         Reconnecting ◀──fault── Ready            Failed
//! ```

use crate::domain::command::Command;
use crate::domain::models::{AppEvent, MessageSeverity, SessionFault, SessionState, StatusMessage};
use crate::domain::protocol;
use crate::domain::repeater::CommandRepeater;
use crate::domain::settings::SessionConfig;
use crate::domain::transport::{
    LinkId, LinkState, ServiceTable, Transport, TransportError, TransportEvent, TransportEventKind,
};
use crate::domain::write_queue::{Completion, WriteQueue};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const RECONNECT_NOTICE: &str = "Attempting to reconnect to BLE device...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// One-shot timers; expiry is reported back through
/// [`SessionController::handle_timer`]
pub trait Scheduler {
    fn schedule(&mut self, timer: TimerId, after: Duration);
    fn cancel(&mut self, timer: TimerId);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a session is already active ({0:?})")]
    AlreadyActive(SessionState),
    #[error("device address is empty")]
    EmptyAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPurpose {
    Repeat(Command),
    Reconnect,
}

/// One connection attempt
#[derive(Debug)]
struct Session {
    link: LinkId,
    queue: WriteQueue,
}

pub struct SessionController<T, S> {
    transport: T,
    scheduler: S,
    config: SessionConfig,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    state: SessionState,
    /// Remembered from the last external connect request
    address: Option<String>,
    session: Option<Session>,
    repeater: CommandRepeater,
    timers: HashMap<TimerId, TimerPurpose>,
    next_timer: u64,
    next_link: u64,
}

impl<T: Transport, S: Scheduler> SessionController<T, S> {
    pub fn new(
        transport: T,
        scheduler: S,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            transport,
            scheduler,
            config,
            event_sender,
            state: SessionState::Disconnected,
            address: None,
            session: None,
            repeater: CommandRepeater::new(),
            timers: HashMap::new(),
            next_timer: 0,
            next_link: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn held_command(&self) -> Option<Command> {
        self.repeater.active()
    }

    pub fn is_writing(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.queue.is_writing())
    }

    pub fn write_failure_count(&self) -> u32 {
        self.session
            .as_ref()
            .map_or(0, |session| session.queue.failure_count())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// User-initiated connect
    pub fn connect(&mut self, address: &str) -> Result<(), SessionError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(SessionError::EmptyAddress);
        }
        if !self.state.is_disconnected() {
            return Err(SessionError::AlreadyActive(self.state.clone()));
        }

        // An explicit connect supersedes any scheduled retry
        self.cancel_timers(|purpose| purpose == TimerPurpose::Reconnect);
        self.address = Some(address.to_string());
        self.open_session();
        Ok(())
    }

    /// Navigation away: drop everything without waiting for outstanding writes
    pub fn leave(&mut self) {
        info!("Tearing down session");
        self.cancel_timers(|_| true);
        // The start/stop toggle belongs to the screen being left
        self.repeater = CommandRepeater::new();
        self.close_session();
        self.address = None;
        self.set_state(SessionState::Disconnected);
    }

    pub fn press(&mut self, command: Command) {
        if !self.repeater.press(command) {
            debug!(
                "Ignoring press of '{}' while '{:?}' is held",
                command,
                self.repeater.active()
            );
            return;
        }
        debug!("Holding '{}'", command);
        self.emit(command);
        self.arm_repeat(command);
    }

    pub fn release(&mut self) {
        let Some(released) = self.repeater.release() else {
            return;
        };
        if let Some(timer) = released.timer {
            self.cancel_timer(timer);
        }
        debug!("Released '{}'", released.command);

        if released.command == Command::StartStop {
            let label = self.repeater.toggle_start_stop();
            let _ = self.event_sender.send(AppEvent::StartStopLabel(label));
            self.emit(Command::StartStop);
        }
    }

    pub fn handle_timer(&mut self, timer: TimerId) {
        let Some(purpose) = self.timers.remove(&timer) else {
            debug!("Ignoring stale timer {:?}", timer);
            return;
        };

        match purpose {
            TimerPurpose::Repeat(command) => {
                if self.repeater.should_fire(timer, command) {
                    self.emit(command);
                    self.arm_repeat(command);
                }
            }
            TimerPurpose::Reconnect => {
                self.cancel_timers(|purpose| purpose == TimerPurpose::Reconnect);
                if matches!(self.state, SessionState::Reconnecting(_)) {
                    info!("Attempting to reconnect to BLE device...");
                    self.open_session();
                }
            }
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        let current = self.session.as_ref().map(|session| session.link);
        if current != Some(event.link) {
            debug!(
                "Dropping event for link {:?} (current {:?}): {:?}",
                event.link, current, event.kind
            );
            return;
        }

        match event.kind {
            TransportEventKind::ConnectionStateChanged(link_state) => {
                self.on_connection_state(link_state)
            }
            TransportEventKind::ServicesDiscovered(result) => self.on_services_discovered(result),
            TransportEventKind::WriteComplete(result) => self.on_write_complete(result),
            TransportEventKind::ValueChanged {
                characteristic,
                value,
            } => {
                if self.state.is_ready() && characteristic == self.config.control_char_uuid {
                    let text = protocol::decode_telemetry(&value);
                    debug!("Received data: {}", text);
                    let _ = self.event_sender.send(AppEvent::Telemetry(text));
                }
            }
        }
    }

    fn on_connection_state(&mut self, link_state: LinkState) {
        match (link_state, &self.state) {
            (LinkState::Connected, SessionState::Connecting) => {
                info!("Connected to GATT server.");
                self.set_state(SessionState::ServicesDiscovering);
                self.transport.discover_services();
            }
            (
                LinkState::Disconnected,
                SessionState::Connecting | SessionState::ServicesDiscovering | SessionState::Ready,
            ) => {
                info!("Disconnected from GATT server.");
                self.fail(SessionFault::LinkLost);
            }
            (link_state, state) => {
                debug!("Ignoring link state {:?} in {:?}", link_state, state);
            }
        }
    }

    fn on_services_discovered(&mut self, result: Result<ServiceTable, TransportError>) {
        if self.state != SessionState::ServicesDiscovering {
            debug!("Ignoring discovery result in {:?}", self.state);
            return;
        }

        let table = match result {
            Ok(table) => table,
            Err(e) => {
                self.fail(SessionFault::DiscoveryFailed(e.to_string()));
                return;
            }
        };

        let service = self.config.service_uuid;
        let characteristic = self.config.control_char_uuid;
        if !table.has_service(&service) {
            self.fail(SessionFault::ServiceMissing);
            return;
        }
        if !table.has_characteristic(&service, &characteristic) {
            self.fail(SessionFault::CharacteristicMissing);
            return;
        }

        self.transport.set_notification(characteristic, true);
        if let Some(session) = self.session.as_mut() {
            session.queue.enable();
        }
        self.set_state(SessionState::Ready);
        self.send_log("Connection established!", MessageSeverity::Success);
    }

    fn on_write_complete(&mut self, result: Result<(), TransportError>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = &result {
            error!("Characteristic write failed: {}", e);
        }

        match session.queue.complete(result.is_ok()) {
            Completion::Dispatch(next) => self.dispatch(next),
            Completion::Saturated => self.fail(SessionFault::WriteSaturated),
            Completion::Drained | Completion::Unexpected => {}
        }
    }

    /// Offer a command to the current session's queue
    fn emit(&mut self, command: Command) {
        let next = match self.session.as_mut() {
            Some(session) => session.queue.enqueue(command),
            None => None,
        };
        if let Some(next) = next {
            self.dispatch(next);
        }
    }

    /// Issue `first`, then keep going for as long as writes are rejected
    /// synchronously
    fn dispatch(&mut self, first: Command) {
        let characteristic = self.config.control_char_uuid;
        let mut next = Some(first);
        let mut saturated = false;

        while let Some(command) = next.take() {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            match self
                .transport
                .write_characteristic(characteristic, command.as_byte())
            {
                Ok(()) => debug!("Writing '{}'", command),
                Err(e) => {
                    error!("Failed to write '{}' to characteristic: {}", command, e);
                    match session.queue.complete(false) {
                        Completion::Dispatch(following) => next = Some(following),
                        Completion::Saturated => saturated = true,
                        Completion::Drained | Completion::Unexpected => {}
                    }
                }
            }
        }

        if saturated {
            self.fail(SessionFault::WriteSaturated);
        }
    }

    /// Enter a disconnected state, scheduling a retry for transport faults
    fn fail(&mut self, fault: SessionFault) {
        if let Some(held) = self.repeater.release() {
            if let Some(timer) = held.timer {
                self.cancel_timer(timer);
            }
        }
        self.close_session();

        if fault.is_recoverable() {
            warn!("Session lost ({}), reconnecting in {:?}", fault, self.config.reconnect_delay);
            let timer = self.allocate_timer(TimerPurpose::Reconnect);
            self.scheduler.schedule(timer, self.config.reconnect_delay);
            self.set_state(SessionState::Reconnecting(fault));
            self.send_log(RECONNECT_NOTICE, MessageSeverity::Warning);
        } else {
            error!("Session failed: {}", fault);
            self.send_log(format!("Connection failed: {}", fault), MessageSeverity::Error);
            self.set_state(SessionState::Failed(fault));
        }
    }

    /// Abandon queued and in-flight writes and release the link
    fn close_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Some(command) = session.queue.in_flight() {
            debug!(
                "Abandoning in-flight '{}' and {} queued command(s)",
                command,
                session.queue.len()
            );
        }
        session.queue.disable();
        self.transport.disconnect();
    }

    /// Fresh session for the remembered address
    fn open_session(&mut self) {
        let Some(address) = self.address.clone() else {
            warn!("No device address to connect to");
            return;
        };
        self.next_link += 1;
        let link = LinkId(self.next_link);
        self.session = Some(Session {
            link,
            queue: WriteQueue::new(self.config.max_write_failures),
        });

        info!("Connecting to BLE device {} ({:?})", address, link);
        self.set_state(SessionState::Connecting);
        self.transport.connect(link, &address);
    }

    fn arm_repeat(&mut self, command: Command) {
        // A fault during emission may already have released the control
        if self.repeater.active() != Some(command) {
            return;
        }
        let timer = self.allocate_timer(TimerPurpose::Repeat(command));
        self.repeater.arm(timer);
        self.scheduler.schedule(timer, self.config.repeat_interval);
    }

    fn allocate_timer(&mut self, purpose: TimerPurpose) -> TimerId {
        self.next_timer += 1;
        let timer = TimerId(self.next_timer);
        self.timers.insert(timer, purpose);
        timer
    }

    fn cancel_timer(&mut self, timer: TimerId) {
        if self.timers.remove(&timer).is_some() {
            self.scheduler.cancel(timer);
        }
    }

    fn cancel_timers(&mut self, mut filter: impl FnMut(TimerPurpose) -> bool) {
        let doomed: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, purpose)| filter(**purpose))
            .map(|(timer, _)| *timer)
            .collect();
        for timer in doomed {
            self.cancel_timer(timer);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!("Session state: {:?} -> {:?}", self.state, state);
        self.state = state.clone();
        let _ = self.event_sender.send(AppEvent::SessionState(state));
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualScheduler;
    use super::*;
    use crate::domain::transport::test_support::{RecordingTransport, TransportCall};

    const ADDRESS: &str = "C8:2B:96:11:22:33";
    const REPEAT: Duration = Duration::from_millis(100);
    const RECONNECT: Duration = Duration::from_millis(5000);

    type Controller = SessionController<RecordingTransport, ManualScheduler>;

    fn controller() -> (Controller, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = SessionController::new(
            RecordingTransport::default(),
            ManualScheduler::default(),
            SessionConfig::default(),
            tx,
        );
        (controller, rx)
    }

    fn full_table() -> ServiceTable {
        let config = SessionConfig::default();
        ServiceTable::new().with_service(config.service_uuid, [config.control_char_uuid])
    }

    fn current_link(controller: &Controller) -> LinkId {
        controller
            .transport()
            .connects()
            .last()
            .map(|(link, _)| *link)
            .unwrap()
    }

    fn deliver(controller: &mut Controller, kind: TransportEventKind) {
        let link = current_link(controller);
        controller.handle_transport_event(TransportEvent::new(link, kind));
    }

    fn ready_controller() -> (Controller, mpsc::UnboundedReceiver<AppEvent>) {
        let (mut controller, rx) = controller();
        controller.connect(ADDRESS).unwrap();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Connected),
        );
        deliver(
            &mut controller,
            TransportEventKind::ServicesDiscovered(Ok(full_table())),
        );
        assert_eq!(controller.state(), &SessionState::Ready);
        (controller, rx)
    }

    fn complete_write(controller: &mut Controller, success: bool) {
        let result = if success {
            Ok(())
        } else {
            Err(TransportError::Stack("write rejected".to_string()))
        };
        deliver(controller, TransportEventKind::WriteComplete(result));
    }

    fn fire_repeat(controller: &mut Controller) {
        let timers = controller.scheduler().pending_with_delay(REPEAT);
        assert_eq!(timers.len(), 1, "exactly one repeat timer pending");
        fire(controller, timers[0]);
    }

    fn fire(controller: &mut Controller, timer: TimerId) {
        controller.scheduler.pending.retain(|(pending, _)| *pending != timer);
        controller.handle_timer(timer);
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_connect_lifecycle_reaches_ready() {
        let (controller, mut rx) = ready_controller();
        let config = SessionConfig::default();

        assert_eq!(
            controller.transport().calls,
            vec![
                TransportCall::Connect(LinkId(1), ADDRESS.to_string()),
                TransportCall::DiscoverServices,
                TransportCall::SetNotification(config.control_char_uuid, true),
            ]
        );

        let states: Vec<SessionState> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::SessionState(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::ServicesDiscovering,
                SessionState::Ready,
            ]
        );
    }

    #[test]
    fn test_connect_rejects_empty_or_active() {
        let (mut controller, _rx) = controller();
        assert_eq!(controller.connect("  "), Err(SessionError::EmptyAddress));

        controller.connect(ADDRESS).unwrap();
        assert_eq!(
            controller.connect(ADDRESS),
            Err(SessionError::AlreadyActive(SessionState::Connecting))
        );
    }

    #[test]
    fn test_press_dispatches_immediately_then_every_interval() {
        let (mut controller, _rx) = ready_controller();

        controller.press(Command::Forward);
        assert_eq!(controller.transport().writes(), vec!['F']);

        for expected in 2..=4 {
            complete_write(&mut controller, true);
            fire_repeat(&mut controller);
            assert_eq!(controller.transport().writes().len(), expected);
        }

        controller.release();
        assert!(controller.scheduler().pending_with_delay(REPEAT).is_empty());
        assert_eq!(controller.transport().writes(), vec!['F'; 4]);
    }

    #[test]
    fn test_one_write_in_flight_while_repeating() {
        let (mut controller, _rx) = ready_controller();

        controller.press(Command::Left);
        // Completion has not arrived yet: repeats queue up behind it
        fire_repeat(&mut controller);
        fire_repeat(&mut controller);
        assert_eq!(controller.transport().writes(), vec!['L']);
        assert!(controller.is_writing());

        complete_write(&mut controller, true);
        assert_eq!(controller.transport().writes(), vec!['L', 'L']);
        complete_write(&mut controller, true);
        assert_eq!(controller.transport().writes(), vec!['L', 'L', 'L']);
        complete_write(&mut controller, true);
        assert!(!controller.is_writing());
    }

    #[test]
    fn test_second_press_keeps_first_command() {
        let (mut controller, _rx) = ready_controller();

        controller.press(Command::Up);
        controller.press(Command::Down);
        assert_eq!(controller.held_command(), Some(Command::Up));

        complete_write(&mut controller, true);
        fire_repeat(&mut controller);
        assert_eq!(controller.transport().writes(), vec!['U', 'U']);
    }

    #[test]
    fn test_release_mid_cycle_cancels_next_emission() {
        let (mut controller, _rx) = ready_controller();

        controller.press(Command::Back);
        let armed = controller.scheduler().pending_with_delay(REPEAT);
        controller.release();

        // A timer firing after cancellation is ignored
        controller.handle_timer(armed[0]);
        complete_write(&mut controller, true);
        assert_eq!(controller.transport().writes(), vec!['B']);
        assert_eq!(controller.scheduler().cancelled, armed);
    }

    #[test]
    fn test_release_without_press_is_noop() {
        let (mut controller, mut rx) = ready_controller();
        drain(&mut rx);

        controller.release();
        controller.release();
        assert!(controller.transport().writes().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_start_stop_release_toggles_and_emits_once_more() {
        let (mut controller, mut rx) = ready_controller();
        drain(&mut rx);

        controller.press(Command::StartStop);
        complete_write(&mut controller, true);
        controller.release();

        assert_eq!(controller.transport().writes(), vec!['S', 'S']);
        assert_eq!(
            drain(&mut rx),
            vec![AppEvent::StartStopLabel("Stop")]
        );
        assert!(controller.scheduler().pending_with_delay(REPEAT).is_empty());

        complete_write(&mut controller, true);
        controller.press(Command::StartStop);
        complete_write(&mut controller, true);
        controller.release();
        assert_eq!(drain(&mut rx), vec![AppEvent::StartStopLabel("Start")]);
    }

    #[test]
    fn test_start_stop_label_starts_over_after_leave() {
        let (mut controller, mut rx) = ready_controller();
        controller.press(Command::StartStop);
        controller.release();
        controller.leave();

        controller.connect(ADDRESS).unwrap();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Connected),
        );
        deliver(
            &mut controller,
            TransportEventKind::ServicesDiscovered(Ok(full_table())),
        );
        assert_eq!(controller.state(), &SessionState::Ready);
        drain(&mut rx);

        controller.press(Command::StartStop);
        controller.release();
        assert_eq!(drain(&mut rx), vec![AppEvent::StartStopLabel("Stop")]);
    }

    #[test]
    fn test_three_failures_schedule_single_reconnect() {
        let (mut controller, mut rx) = ready_controller();

        controller.press(Command::Up);
        for _ in 0..2 {
            complete_write(&mut controller, false);
            fire_repeat(&mut controller);
            assert!(controller.write_failure_count() < 3);
        }
        complete_write(&mut controller, false);

        assert_eq!(
            controller.state(),
            &SessionState::Reconnecting(SessionFault::WriteSaturated)
        );
        assert_eq!(controller.held_command(), None);
        assert!(!controller.is_writing());
        assert_eq!(controller.scheduler().pending_with_delay(RECONNECT).len(), 1);
        assert!(controller.scheduler().pending_with_delay(REPEAT).is_empty());
        assert_eq!(
            controller.transport().count(&TransportCall::Disconnect),
            1
        );
        assert!(drain(&mut rx).contains(&AppEvent::LogMessage(StatusMessage::new(
            RECONNECT_NOTICE,
            MessageSeverity::Warning
        ))));

        let reconnect = controller.scheduler().pending_with_delay(RECONNECT)[0];
        fire(&mut controller, reconnect);
        assert_eq!(controller.state(), &SessionState::Connecting);
        assert_eq!(
            controller.transport().connects(),
            vec![
                (LinkId(1), ADDRESS.to_string()),
                (LinkId(2), ADDRESS.to_string()),
            ]
        );
    }

    #[test]
    fn test_synchronous_write_rejection_counts_as_failure() {
        let (mut controller, _rx) = ready_controller();
        controller.transport.reject_writes = Some(TransportError::NotConnected);

        controller.press(Command::Right);
        assert_eq!(controller.write_failure_count(), 1);
        fire_repeat(&mut controller);
        fire_repeat(&mut controller);

        assert_eq!(
            controller.state(),
            &SessionState::Reconnecting(SessionFault::WriteSaturated)
        );
        assert_eq!(controller.scheduler().pending_with_delay(RECONNECT).len(), 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (mut controller, _rx) = ready_controller();

        controller.press(Command::Clockwise);
        complete_write(&mut controller, false);
        fire_repeat(&mut controller);
        complete_write(&mut controller, false);
        assert_eq!(controller.write_failure_count(), 2);

        fire_repeat(&mut controller);
        complete_write(&mut controller, true);
        assert_eq!(controller.write_failure_count(), 0);
        assert_eq!(controller.state(), &SessionState::Ready);
    }

    #[test]
    fn test_missing_characteristic_fails_without_retry() {
        let (mut controller, _rx) = controller();
        let config = SessionConfig::default();
        controller.connect(ADDRESS).unwrap();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Connected),
        );
        let table = ServiceTable::new().with_service(config.service_uuid, []);
        deliver(&mut controller, TransportEventKind::ServicesDiscovered(Ok(table)));

        assert_eq!(
            controller.state(),
            &SessionState::Failed(SessionFault::CharacteristicMissing)
        );
        assert!(controller.scheduler().pending.is_empty());

        controller.press(Command::Forward);
        assert!(controller.transport().writes().is_empty());
    }

    #[test]
    fn test_missing_service_and_discovery_error_fail() {
        let (mut controller, _rx) = controller();
        controller.connect(ADDRESS).unwrap();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Connected),
        );
        deliver(
            &mut controller,
            TransportEventKind::ServicesDiscovered(Ok(ServiceTable::new())),
        );
        assert_eq!(
            controller.state(),
            &SessionState::Failed(SessionFault::ServiceMissing)
        );

        // A fresh connect is accepted from the failed state
        controller.connect(ADDRESS).unwrap();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Connected),
        );
        deliver(
            &mut controller,
            TransportEventKind::ServicesDiscovered(Err(TransportError::Stack("discovery timed out".to_string()))),
        );
        assert!(matches!(
            controller.state(),
            SessionState::Failed(SessionFault::DiscoveryFailed(_))
        ));
        assert!(controller.scheduler().pending.is_empty());
    }

    #[test]
    fn test_notification_forwarded_verbatim_when_ready() {
        let (mut controller, mut rx) = ready_controller();
        drain(&mut rx);
        let characteristic = SessionConfig::default().control_char_uuid;

        deliver(
            &mut controller,
            TransportEventKind::ValueChanged {
                characteristic,
                value: b"42".to_vec(),
            },
        );
        assert_eq!(drain(&mut rx), vec![AppEvent::Telemetry("42".to_string())]);
    }

    #[test]
    fn test_notification_ignored_before_ready() {
        let (mut controller, mut rx) = controller();
        controller.connect(ADDRESS).unwrap();
        drain(&mut rx);

        deliver(
            &mut controller,
            TransportEventKind::ValueChanged {
                characteristic: SessionConfig::default().control_char_uuid,
                value: b"7".to_vec(),
            },
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_disconnect_while_ready_clears_everything() {
        let (mut controller, _rx) = ready_controller();
        controller.press(Command::Forward);

        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Disconnected),
        );

        assert_eq!(
            controller.state(),
            &SessionState::Reconnecting(SessionFault::LinkLost)
        );
        assert_eq!(controller.held_command(), None);
        assert!(!controller.is_writing());
        assert!(controller.scheduler().pending_with_delay(REPEAT).is_empty());
        assert_eq!(controller.scheduler().pending_with_delay(RECONNECT).len(), 1);
    }

    #[test]
    fn test_stale_link_events_are_dropped() {
        let (mut controller, _rx) = ready_controller();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Disconnected),
        );
        let reconnect = controller.scheduler().pending_with_delay(RECONNECT)[0];
        fire(&mut controller, reconnect);

        // A late disconnect from the first link must not schedule another retry
        controller.handle_transport_event(TransportEvent::new(
            LinkId(1),
            TransportEventKind::ConnectionStateChanged(LinkState::Disconnected),
        ));
        assert_eq!(controller.state(), &SessionState::Connecting);
        assert!(controller.scheduler().pending.is_empty());
    }

    #[test]
    fn test_connect_failure_schedules_retry() {
        let (mut controller, _rx) = controller();
        controller.connect(ADDRESS).unwrap();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Disconnected),
        );
        assert_eq!(
            controller.state(),
            &SessionState::Reconnecting(SessionFault::LinkLost)
        );
        assert_eq!(controller.scheduler().pending_with_delay(RECONNECT).len(), 1);
    }

    #[test]
    fn test_reconnect_timer_cancels_other_pending_retries() {
        let (mut controller, _rx) = ready_controller();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Disconnected),
        );
        // Stray second retry, e.g. from an overlapping failure path
        let extra = controller.allocate_timer(TimerPurpose::Reconnect);
        controller.scheduler.schedule(extra, RECONNECT);

        let first = controller.scheduler().pending_with_delay(RECONNECT)[0];
        fire(&mut controller, first);
        assert!(controller.scheduler().pending.is_empty());
        assert!(controller.scheduler().cancelled.contains(&extra));

        controller.handle_timer(extra);
        assert_eq!(controller.transport().connects().len(), 2);
    }

    #[test]
    fn test_leave_cancels_timers_and_disconnects() {
        let (mut controller, mut rx) = ready_controller();
        controller.press(Command::Down);

        controller.leave();

        assert_eq!(controller.state(), &SessionState::Disconnected);
        assert!(controller.scheduler().pending.is_empty());
        assert_eq!(controller.address(), None);
        assert_eq!(
            controller.transport().calls.last(),
            Some(&TransportCall::Disconnect)
        );
        assert_eq!(
            drain(&mut rx).last(),
            Some(&AppEvent::SessionState(SessionState::Disconnected))
        );

        // Writes completing after teardown are ignored
        controller.handle_transport_event(TransportEvent::new(
            LinkId(1),
            TransportEventKind::WriteComplete(Ok(())),
        ));
        assert_eq!(controller.transport().writes(), vec!['D']);
    }

    #[test]
    fn test_leave_during_reconnect_wait_stops_retry() {
        let (mut controller, _rx) = ready_controller();
        deliver(
            &mut controller,
            TransportEventKind::ConnectionStateChanged(LinkState::Disconnected),
        );
        let reconnect = controller.scheduler().pending_with_delay(RECONNECT)[0];

        controller.leave();
        controller.handle_timer(reconnect);

        assert_eq!(controller.state(), &SessionState::Disconnected);
        assert_eq!(controller.transport().connects().len(), 1);
    }
}
