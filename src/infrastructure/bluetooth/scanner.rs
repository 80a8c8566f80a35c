//! BLE Scanner Module
//!
//! Discovers nearby peripherals advertising the remote control service.

use crate::domain::models::{AppEvent, MessageSeverity, ScannedDevice, StatusMessage};
use btleplug::api::{Central, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::Adapter;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// BLE Scanner for discovering remote control peripherals
pub struct BleScanner {
    adapter: Adapter,
    task: Option<JoinHandle<()>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl BleScanner {
    /// Create a new scanner
    pub fn new(adapter: Adapter, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            adapter,
            task: None,
            event_sender,
        }
    }

    /// Start scanning for BLE devices
    ///
    /// # Arguments
    /// * `service_uuid` - The service UUID to filter for
    /// * `show_all_devices` - If true, report every BLE device regardless of service UUID
    pub fn start(&mut self, service_uuid: Uuid, show_all_devices: bool) {
        // Stop any existing scan
        self.stop();

        info!("Starting BLE scan for service UUID: {}", service_uuid);
        self.send_log("Scanning for BLE devices...", MessageSeverity::Info);

        let adapter = self.adapter.clone();
        let sender = self.event_sender.clone();

        self.task = Some(tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Failed to watch adapter events: {}", e);
                    return;
                }
            };

            let filter = ScanFilter {
                services: if show_all_devices {
                    Vec::new()
                } else {
                    vec![service_uuid]
                },
            };
            if let Err(e) = adapter.start_scan(filter).await {
                warn!("Failed to start scan: {}", e);
                let _ = sender.send(AppEvent::LogMessage(StatusMessage::new(
                    format!("Scan failed: {}", e),
                    MessageSeverity::Error,
                )));
                return;
            }

            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };

                if let Some(device) = scanned_device(&properties, service_uuid, show_all_devices)
                {
                    debug!("Found device {} ({})", device.name, device.address);
                    let _ = sender.send(AppEvent::DeviceFound(device));
                }
            }
        }));
    }

    /// Stop scanning
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            info!("Stopping BLE scan...");
            task.abort();
            self.send_log("Scan stopped.", MessageSeverity::Info);

            let adapter = self.adapter.clone();
            tokio::spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    debug!("Failed to stop scan cleanly: {}", e);
                }
            });
        }
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Turn advertisement properties into a list entry, if the device qualifies
///
/// Some platforms ignore the scan filter, so the service is checked again.
fn scanned_device(
    properties: &PeripheralProperties,
    service_uuid: Uuid,
    show_all_devices: bool,
) -> Option<ScannedDevice> {
    if !show_all_devices && !properties.services.contains(&service_uuid) {
        return None;
    }

    let name = properties
        .local_name
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    Some(ScannedDevice {
        name,
        address: properties.address.to_string(),
        signal_strength: properties.rssi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol;

    fn properties(name: Option<&str>, services: Vec<Uuid>) -> PeripheralProperties {
        PeripheralProperties {
            local_name: name.map(str::to_string),
            services,
            rssi: Some(-60),
            ..Default::default()
        }
    }

    #[test]
    fn test_device_advertising_service_is_listed() {
        let props = properties(Some("RoverBot"), vec![protocol::service_uuid()]);
        let device = scanned_device(&props, protocol::service_uuid(), false).unwrap();
        assert_eq!(device.name, "RoverBot");
        assert_eq!(device.signal_strength, Some(-60));
        assert_eq!(device.address, props.address.to_string());
    }

    #[test]
    fn test_unrelated_device_filtered_unless_show_all() {
        let props = properties(Some(""), Vec::new());
        assert!(scanned_device(&props, protocol::service_uuid(), false).is_none());

        let device = scanned_device(&props, protocol::service_uuid(), true).unwrap();
        assert_eq!(device.name, "Unknown");
    }
}
