//! USB subsystem
//!
//! Owns the exclusive session with a relay's HID interface and the feature
//! report control transfers issued through it. All calls are blocking and
//! bounded by a per-transfer timeout.

pub mod device;
pub mod transfers;

pub use device::Session;
pub use transfers::{DEFAULT_TIMEOUT, read_feature_report, send_feature_report};
