//! Wire protocol for MP709 USB HID relays
//!
//! This crate defines the feature report commands understood by the relay,
//! decoding of its responses into typed values, and the error types shared
//! by the USB layers above it. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{decode_info, decode_port_state, GET_INFO, OPCODE_GET_INFO};
//!
//! assert_eq!(GET_INFO[0], OPCODE_GET_INFO);
//!
//! let info = decode_info(&[0x1D, 1, 0x02, 0x00, 0x00, 0x00, 0x00, 0x2A]).unwrap();
//! assert_eq!(info.id, 42);
//!
//! let on = decode_port_state(&[0x7E, 0x00, 0x00, 0, 0, 0, 0, 0]).unwrap();
//! assert!(on);
//! ```

pub mod error;
pub mod report;
pub mod types;

pub use error::{ProtocolError, Result};
pub use report::{
    COMMAND_LEN, Command, FeatureReport, GET_INFO, GET_PORT, GET_REPORT, HID_REQ_TO_DEV,
    HID_REQ_TO_HOST, OPCODE_GET_INFO, OPCODE_GET_PORT, OPCODE_SET_PORT, PORT_OFF, PORT_ON,
    RELAY_PRODUCT_ID, RELAY_VENDOR_ID, REPORT_LEN, REPORT_TYPE_FEATURE, SET_PORT_OFF, SET_PORT_ON,
    SET_REPORT, decode_info, decode_port_state, encode_command, set_port_command,
};
pub use types::{DeviceInfo, RelayStatus, UsbError};
