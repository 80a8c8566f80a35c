//! Transport contract
//!
//! The session logic never touches the BLE stack directly. It issues
//! fire-and-forget requests through [`Transport`] and receives the results
//! later as [`TransportEvent`]s on the owning event loop.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

/// Identifies one connect attempt
///
/// Every event carries the link it was produced for so completions from a
/// replaced session can be told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("characteristic {0} is not available")]
    CharacteristicUnavailable(Uuid),
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("peripheral {0} not found")]
    PeripheralNotFound(String),
    #[error("BLE stack error: {0}")]
    Stack(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Services and their characteristics as reported by discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTable {
    services: HashMap<Uuid, HashSet<Uuid>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: Uuid, characteristics: impl IntoIterator<Item = Uuid>) {
        self.services
            .entry(service)
            .or_default()
            .extend(characteristics);
    }

    pub fn with_service(
        mut self,
        service: Uuid,
        characteristics: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        self.insert(service, characteristics);
        self
    }

    pub fn has_service(&self, service: &Uuid) -> bool {
        self.services.contains_key(service)
    }

    pub fn has_characteristic(&self, service: &Uuid, characteristic: &Uuid) -> bool {
        self.services
            .get(service)
            .is_some_and(|chars| chars.contains(characteristic))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    ConnectionStateChanged(LinkState),
    ServicesDiscovered(Result<ServiceTable, TransportError>),
    WriteComplete(Result<(), TransportError>),
    /// Unsolicited notification from a subscribed characteristic
    ValueChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub link: LinkId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(link: LinkId, kind: TransportEventKind) -> Self {
        Self { link, kind }
    }
}

/// Asynchronous BLE primitives the session is layered on
///
/// None of these block. Results arrive later as [`TransportEvent`]s tagged
/// with the link passed to [`Transport::connect`]. A synchronous `Err` from
/// `write_characteristic` means the write was never issued and no
/// `WriteComplete` will follow.
pub trait Transport {
    fn connect(&mut self, link: LinkId, address: &str);
    fn discover_services(&mut self);
    fn set_notification(&mut self, characteristic: Uuid, enabled: bool);
    fn write_characteristic(&mut self, characteristic: Uuid, value: u8)
        -> Result<(), TransportError>;
    /// Synchronous and idempotent
    fn disconnect(&mut self);
}
