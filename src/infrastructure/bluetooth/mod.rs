//! Bluetooth Module
//!
//! BLE plumbing underneath the control session.
//!
//! ## Architecture
//!
//! ```text
//!   UI ──BluetoothCommand──▶ BluetoothService ◀──TransportEvent── BtleplugTransport
//!                                  │                                   ▲
//!                                  ▼                                   │
//!                          SessionController ──── Transport calls ─────┘
//! ```
//!
//! ## Modules
//!
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - `btleplug` transport
//! - [`service`] - Event loop owning the session

pub mod connection;
pub mod scanner;
pub mod service;

