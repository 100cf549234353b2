//! Relay and USB type definitions
//!
//! This module defines the structured values decoded from relay responses,
//! the status record reported for each controlled relay, and the USB error
//! conditions surfaced by the transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device information returned by a GET_INFO exchange
///
/// `id` is the factory-assigned serial used to tell otherwise identical
/// boards apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Hardware family code
    pub family: u8,
    /// Firmware version
    pub version: u16,
    /// Device identifier
    pub id: u32,
}

/// Observed state of one relay after a control pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatus {
    /// Bus number the relay is attached to
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
    /// Decoded device information
    pub info: DeviceInfo,
    /// Whether the relay contact is closed
    pub port_on: bool,
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "family ({}), fw version ({}), id ({}), state ({})",
            self.info.family,
            self.info.version,
            self.info.id,
            u8::from(self.port_on)
        )
    }
}

/// USB error types
///
/// Maps to libusb error codes. See rusb::Error for details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    Timeout,
    /// Endpoint stalled (protocol error)
    Pipe,
    /// Device was disconnected
    NoDevice,
    /// Device or endpoint not found
    NotFound,
    /// Device is busy
    Busy,
    /// Buffer overflow
    Overflow,
    /// I/O error
    Io,
    /// Invalid parameter
    InvalidParam,
    /// Access denied (permissions)
    Access,
    /// Operation not supported on this platform
    NotSupported,
    /// Other error with message
    Other { message: String },
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbError::Timeout => f.write_str("operation timed out"),
            UsbError::Pipe => f.write_str("pipe error"),
            UsbError::NoDevice => f.write_str("no such device (it may have been disconnected)"),
            UsbError::NotFound => f.write_str("entity not found"),
            UsbError::Busy => f.write_str("resource busy"),
            UsbError::Overflow => f.write_str("overflow"),
            UsbError::Io => f.write_str("input/output error"),
            UsbError::InvalidParam => f.write_str("invalid parameter"),
            UsbError::Access => f.write_str("access denied (insufficient permissions)"),
            UsbError::NotSupported => f.write_str("operation not supported"),
            UsbError::Other { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for UsbError {}
