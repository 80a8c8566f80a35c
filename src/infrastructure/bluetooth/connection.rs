//! BLE Connection Module
//!
//! [`Transport`] implementation over `btleplug`. Every request is spawned as
//! a task on the current runtime and reports back through the event channel,
//! tagged with the link it was issued for.

use crate::domain::protocol;
use crate::domain::transport::{
    LinkId, LinkState, ServiceTable, Transport, TransportError, TransportEvent, TransportEventKind,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long to scan for a peripheral the adapter has not seen yet
    pub scan_timeout: Duration,
    /// Delay between peripheral list polls while scanning
    pub poll_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected => TransportError::NotConnected,
            other => TransportError::Stack(other.to_string()),
        }
    }
}

#[derive(Clone)]
struct EventSender {
    link: LinkId,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSender {
    fn send(&self, kind: TransportEventKind) {
        let _ = self.sender.send(TransportEvent::new(self.link, kind));
    }
}

/// BLE transport backed by the first available adapter
pub struct BtleplugTransport {
    adapter: Adapter,
    event_sender: mpsc::UnboundedSender<TransportEvent>,
    config: ConnectionConfig,
    link: Option<LinkId>,
    peripheral: PeripheralSlot<Peripheral>,
    tasks: Vec<JoinHandle<()>>,
}

impl BtleplugTransport {
    /// Open the platform BLE manager and pick the first adapter
    pub async fn new(
        event_sender: mpsc::UnboundedSender<TransportEvent>,
        config: ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;
        info!("Using Bluetooth adapter: {}", adapter.adapter_info().await?);

        Ok(Self {
            adapter,
            event_sender,
            config,
            link: None,
            peripheral: PeripheralSlot::new(),
            tasks: Vec::new(),
        })
    }

    /// Adapter handle shared with the scanner
    pub fn adapter(&self) -> Adapter {
        self.adapter.clone()
    }

    fn sender(&self) -> Option<EventSender> {
        self.link.map(|link| EventSender {
            link,
            sender: self.event_sender.clone(),
        })
    }

    fn connected_peripheral(&self) -> Option<Peripheral> {
        self.peripheral.current()
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|handle| !handle.is_finished());
        self.tasks.push(tokio::spawn(task));
    }
}

impl Transport for BtleplugTransport {
    fn connect(&mut self, link: LinkId, address: &str) {
        self.disconnect();
        self.link = Some(link);
        let Some(sender) = self.sender() else {
            return;
        };

        let adapter = self.adapter.clone();
        let slot = self.peripheral.clone();
        let address = address.to_string();
        let config = self.config.clone();

        self.spawn(async move {
            let (id, mut central_events) =
                match establish(&adapter, &slot, &address, &config).await {
                    Ok(established) => established,
                    Err(e) => {
                        error!("Failed to connect to {}: {}", address, e);
                        sender.send(TransportEventKind::ConnectionStateChanged(
                            LinkState::Disconnected,
                        ));
                        return;
                    }
                };

            sender.send(TransportEventKind::ConnectionStateChanged(
                LinkState::Connected,
            ));

            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        info!("Peripheral {} disconnected", address);
                        sender.send(TransportEventKind::ConnectionStateChanged(
                            LinkState::Disconnected,
                        ));
                        break;
                    }
                }
            }
        });
    }

    fn discover_services(&mut self) {
        let Some(sender) = self.sender() else {
            return;
        };
        let Some(peripheral) = self.connected_peripheral() else {
            sender.send(TransportEventKind::ServicesDiscovered(Err(
                TransportError::NotConnected,
            )));
            return;
        };

        self.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => {
                    let mut table = ServiceTable::new();
                    for service in peripheral.services() {
                        table.insert(
                            service.uuid,
                            service.characteristics.iter().map(|c| c.uuid),
                        );
                    }
                    info!("Discovered {} services", table.len());
                    Ok(table)
                }
                Err(e) => Err(TransportError::from(e)),
            };
            sender.send(TransportEventKind::ServicesDiscovered(result));
        });
    }

    fn set_notification(&mut self, characteristic: Uuid, enabled: bool) {
        let (Some(sender), Some(peripheral)) = (self.sender(), self.connected_peripheral()) else {
            warn!("Cannot change notifications without a connection");
            return;
        };
        let Some(target) = find_characteristic(&peripheral, characteristic) else {
            warn!("Characteristic {} not found for notifications", characteristic);
            return;
        };

        self.spawn(async move {
            if !enabled {
                if let Err(e) = peripheral.unsubscribe(&target).await {
                    warn!("Failed to disable notifications: {}", e);
                }
                return;
            }

            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to open notification stream: {}", e);
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&target).await {
                warn!("Failed to enable notifications: {}", e);
                return;
            }
            debug!(
                "Notifications enabled for {} via descriptor {}",
                characteristic,
                protocol::cccd_uuid()
            );

            while let Some(notification) = notifications.next().await {
                if notification.uuid == characteristic {
                    sender.send(TransportEventKind::ValueChanged {
                        characteristic,
                        value: notification.value,
                    });
                }
            }
            debug!("Notification stream ended");
        });
    }

    fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        value: u8,
    ) -> Result<(), TransportError> {
        let sender = self.sender().ok_or(TransportError::NotConnected)?;
        let peripheral = self
            .connected_peripheral()
            .ok_or(TransportError::NotConnected)?;
        let target = find_characteristic(&peripheral, characteristic)
            .ok_or(TransportError::CharacteristicUnavailable(characteristic))?;

        self.spawn(async move {
            let result = peripheral
                .write(&target, &[value], WriteType::WithResponse)
                .await
                .map_err(TransportError::from);
            sender.send(TransportEventKind::WriteComplete(result));
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
        self.link = None;

        if let Some(peripheral) = self.peripheral.take() {
            info!("Closing connection");
            // Not tracked: must outlive the abort above
            tokio::spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Disconnect reported an error: {}", e);
                }
            });
        }
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
}

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Shared home of the peripheral owned by the current link
///
/// Filled before the connect request is awaited, so tearing the link down
/// mid-connect still finds something to disconnect.
struct PeripheralSlot<P>(Arc<Mutex<Option<P>>>);

impl<P> Clone for PeripheralSlot<P> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<P: Clone> PeripheralSlot<P> {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    fn claim(&self, peripheral: P) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(peripheral);
        }
    }

    fn current(&self) -> Option<P> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }

    fn take(&self) -> Option<P> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Park `peripheral` in `slot`, then run `connect` on it
async fn claim_then_connect<P, F, Fut>(
    slot: &PeripheralSlot<P>,
    peripheral: P,
    connect: F,
) -> Result<P, TransportError>
where
    P: Clone,
    F: FnOnce(P) -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    slot.claim(peripheral.clone());
    connect(peripheral.clone()).await?;
    Ok(peripheral)
}

/// Resolve `address`, connect, and return the id to watch for disconnects
///
/// The adapter event stream is opened first so an immediate drop is not
/// missed.
async fn establish(
    adapter: &Adapter,
    slot: &PeripheralSlot<Peripheral>,
    address: &str,
    config: &ConnectionConfig,
) -> Result<(PeripheralId, CentralEvents), TransportError> {
    let central_events = adapter.events().await?;

    let peripheral = match find_known(adapter, address).await? {
        Some(peripheral) => peripheral,
        None => scan_for(adapter, address, config).await?,
    };

    let peripheral = claim_then_connect(slot, peripheral, |peripheral| async move {
        if !peripheral.is_connected().await? {
            info!("Connecting to {}", address);
            peripheral.connect().await?;
        }
        Ok::<(), TransportError>(())
    })
    .await?;

    Ok((peripheral.id(), central_events))
}

async fn find_known(adapter: &Adapter, address: &str) -> Result<Option<Peripheral>, TransportError> {
    let wanted = address.to_ascii_lowercase();
    for peripheral in adapter.peripherals().await? {
        if let Some(properties) = peripheral.properties().await? {
            if properties.address.to_string().to_ascii_lowercase() == wanted {
                return Ok(Some(peripheral));
            }
        }
        // Platforms without MAC addresses expose an opaque identifier instead
        let id = format!("{:?}", peripheral.id()).to_ascii_lowercase();
        if id.contains(&wanted) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

async fn scan_for(
    adapter: &Adapter,
    address: &str,
    config: &ConnectionConfig,
) -> Result<Peripheral, TransportError> {
    info!("{} not cached, scanning for up to {:?}", address, config.scan_timeout);
    adapter.start_scan(ScanFilter::default()).await?;

    let deadline = tokio::time::Instant::now() + config.scan_timeout;
    let found = loop {
        if let Some(peripheral) = find_known(adapter, address).await? {
            break Some(peripheral);
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(config.poll_interval).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan cleanly: {}", e);
    }
    found.ok_or_else(|| TransportError::PeripheralNotFound(address.to_string()))
}
