//! Common utilities for mp709
//!
//! This crate provides shared functionality between the relay control
//! library and the `mp709` binary: the USB transport abstraction and its
//! rusb implementation, error handling, logging setup, and a scripted relay
//! transport for tests behind the `test-utils` feature.

pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb_types;

pub use error::{Error, Result};
pub use logging::{resolve_log_level, setup_logging};
pub use usb_types::{
    ControlHandle, InterfaceSelection, RusbBackend, RusbCandidate, UsbBackend, UsbCandidate,
    UsbResult, map_rusb_error,
};
