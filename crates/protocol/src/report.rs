//! Feature report encoding and decoding
//!
//! The relay speaks a tiny vendor protocol over HID feature reports. Every
//! exchange starts with a 7-byte command written with SET_REPORT and, for
//! queries, continues with an 8-byte response read back with GET_REPORT.
//!
//! # Command Format
//!
//! ```text
//! [opcode][6 bytes opcode-specific, zero padded]
//! ```
//!
//! # Response Layouts
//!
//! ```text
//! GET_INFO: [echo][family][version lo][version hi][id b3][id b2][id b1][id b0]
//! GET_PORT: [echo][status][status][..]
//! ```
//!
//! Nothing in this module touches a device.

use crate::error::{ProtocolError, Result};
use crate::types::DeviceInfo;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Vendor id shared by every relay of the family
pub const RELAY_VENDOR_ID: u16 = 0x16C0;
/// Product id shared by every relay of the family
pub const RELAY_PRODUCT_ID: u16 = 0x05DF;

/// HID class request: GET_REPORT
pub const GET_REPORT: u8 = 0x01;
/// HID class request: SET_REPORT
pub const SET_REPORT: u8 = 0x09;

/// bmRequestType for class-specific, interface-recipient, device-to-host
pub const HID_REQ_TO_HOST: u8 = 0xA1;
/// bmRequestType for class-specific, interface-recipient, host-to-device
pub const HID_REQ_TO_DEV: u8 = 0x21;

/// wValue selecting the feature report type (report id 0)
pub const REPORT_TYPE_FEATURE: u16 = 0x300;

/// Length of a command written to the device
pub const COMMAND_LEN: usize = 7;
/// Length of a response read from the device
pub const REPORT_LEN: usize = 8;

/// Opcode querying family, firmware version and id
pub const OPCODE_GET_INFO: u8 = 0x1D;
/// Opcode switching the relay contact
pub const OPCODE_SET_PORT: u8 = 0xE7;
/// Opcode querying the relay contact
pub const OPCODE_GET_PORT: u8 = 0x7E;

/// Status byte reported while the contact is closed
pub const PORT_ON: u8 = 0x00;
/// Status byte reported while the contact is open
pub const PORT_OFF: u8 = 0x19;

/// A command buffer ready to be written with SET_REPORT
pub type Command = [u8; COMMAND_LEN];

pub const GET_INFO: Command = [OPCODE_GET_INFO, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
pub const SET_PORT_ON: Command = [OPCODE_SET_PORT, PORT_ON, 0x00, 0x00, 0x00, 0x00, 0x00];
pub const SET_PORT_OFF: Command = [OPCODE_SET_PORT, PORT_OFF, 0x00, 0x00, 0x00, 0x00, 0x00];
pub const GET_PORT: Command = [OPCODE_GET_PORT, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Build a command from an opcode and its trailing bytes
///
/// Trailing bytes beyond the command length are dropped; missing ones are
/// zero.
///
/// # Example
/// ```
/// use protocol::report::{encode_command, SET_PORT_OFF};
///
/// assert_eq!(encode_command(0xE7, &[0x19]), SET_PORT_OFF);
/// ```
pub fn encode_command(opcode: u8, trailing: &[u8]) -> Command {
    let mut command = [0u8; COMMAND_LEN];
    command[0] = opcode;
    let n = trailing.len().min(COMMAND_LEN - 1);
    command[1..=n].copy_from_slice(&trailing[..n]);
    command
}

/// Command switching the relay to the requested state
pub fn set_port_command(on: bool) -> Command {
    if on { SET_PORT_ON } else { SET_PORT_OFF }
}

/// An 8-byte response read back from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureReport([u8; REPORT_LEN]);

impl FeatureReport {
    pub fn as_bytes(&self) -> &[u8; REPORT_LEN] {
        &self.0
    }

    /// Decode as a GET_INFO response
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            family: self.0[1],
            version: LittleEndian::read_u16(&self.0[2..4]),
            id: BigEndian::read_u32(&self.0[4..8]),
        }
    }

    /// Decode as a GET_PORT response
    ///
    /// Both echoed status bytes must agree on the "on" code; anything else,
    /// including a garbled transmission, reads as off.
    pub fn port_state(&self) -> bool {
        self.0[1] == self.0[2] && self.0[1] == PORT_ON
    }
}

impl TryFrom<&[u8]> for FeatureReport {
    type Error = ProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; REPORT_LEN] =
            bytes
                .try_into()
                .map_err(|_| ProtocolError::MalformedResponse {
                    expected: REPORT_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for FeatureReport {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Decode a GET_INFO response
///
/// # Example
/// ```
/// use protocol::report::decode_info;
///
/// let info = decode_info(&[0x1D, 9, 0x01, 0x02, 0x00, 0x00, 0x0E, 0xAE]).unwrap();
/// assert_eq!(info.family, 9);
/// assert_eq!(info.version, 0x0201);
/// assert_eq!(info.id, 3758);
/// ```
pub fn decode_info(response: &[u8]) -> Result<DeviceInfo> {
    FeatureReport::try_from(response).map(|report| report.device_info())
}

/// Decode a GET_PORT response into the relay contact state
pub fn decode_port_state(response: &[u8]) -> Result<bool> {
    FeatureReport::try_from(response).map(|report| report.port_state())
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Place values into a GET_INFO response following the documented layout
    fn info_response(family: u8, version: u16, id: u32) -> [u8; REPORT_LEN] {
        [
            OPCODE_GET_INFO,
            family,
            (version & 0xFF) as u8,
            (version >> 8) as u8,
            (id >> 24) as u8,
            (id >> 16) as u8,
            (id >> 8) as u8,
            id as u8,
        ]
    }

    proptest! {
        /// Property: every (family, version, id) survives the documented layout
        #[test]
        fn prop_decode_info_recovers_fields(
            family in any::<u8>(),
            version in any::<u16>(),
            id in any::<u32>(),
        ) {
            let info = decode_info(&info_response(family, version, id)).unwrap();
            prop_assert_eq!(info, DeviceInfo { family, version, id });
        }

        /// Property: port reads on only when both status bytes equal the on code
        #[test]
        fn prop_port_state_truth_table(
            a in any::<u8>(),
            b in any::<u8>(),
            rest in proptest::collection::vec(any::<u8>(), 5),
        ) {
            let mut response = vec![OPCODE_GET_PORT, a, b];
            response.extend(rest);
            let on = decode_port_state(&response).unwrap();
            prop_assert_eq!(on, a == PORT_ON && b == PORT_ON);
        }

        /// Property: any length other than 8 is rejected by both decoders
        #[test]
        fn prop_wrong_length_rejected(
            data in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            prop_assume!(data.len() != REPORT_LEN);
            prop_assert!(decode_info(&data).is_err());
            prop_assert!(decode_port_state(&data).is_err());
        }
    }
}
