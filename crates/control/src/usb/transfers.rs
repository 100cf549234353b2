//! Feature report transfers
//!
//! HID feature reports travel over endpoint 0 as class-specific control
//! transfers addressed to the claimed interface. Writes use SET_REPORT,
//! reads use GET_REPORT, both with the feature report type in wValue.

use crate::error::{RelayError, Result};
use common::ControlHandle;
use protocol::{
    COMMAND_LEN, Command, FeatureReport, GET_REPORT, HID_REQ_TO_DEV, HID_REQ_TO_HOST,
    REPORT_LEN, REPORT_TYPE_FEATURE, SET_REPORT, UsbError,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for relay transfers (100 ms)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Write a command with SET_REPORT
pub fn send_feature_report<H: ControlHandle>(
    handle: &H,
    interface: u8,
    command: &Command,
    timeout: Duration,
) -> Result<()> {
    debug!(
        "SET_REPORT: request_type={:#x}, value={:#x}, index={}, data={:02x?}, timeout={}ms",
        HID_REQ_TO_DEV,
        REPORT_TYPE_FEATURE,
        interface,
        command,
        timeout.as_millis()
    );

    let written = handle
        .write_control(
            HID_REQ_TO_DEV,
            SET_REPORT,
            REPORT_TYPE_FEATURE,
            u16::from(interface),
            command,
            timeout,
        )
        .map_err(|source| {
            warn!("SET_REPORT failed: {}", source);
            RelayError::TransferFailed {
                request: SET_REPORT,
                source,
            }
        })?;

    if written != COMMAND_LEN {
        warn!("SET_REPORT short write: {} of {} bytes", written, COMMAND_LEN);
        return Err(RelayError::TransferFailed {
            request: SET_REPORT,
            source: UsbError::Other {
                message: format!("short write: {} of {} bytes", written, COMMAND_LEN),
            },
        });
    }

    Ok(())
}

/// Read an 8-byte response with GET_REPORT
pub fn read_feature_report<H: ControlHandle>(
    handle: &H,
    interface: u8,
    timeout: Duration,
) -> Result<FeatureReport> {
    let mut buffer = [0u8; REPORT_LEN];

    let len = handle
        .read_control(
            HID_REQ_TO_HOST,
            GET_REPORT,
            REPORT_TYPE_FEATURE,
            u16::from(interface),
            &mut buffer,
            timeout,
        )
        .map_err(|source| {
            warn!("GET_REPORT failed: {}", source);
            RelayError::TransferFailed {
                request: GET_REPORT,
                source,
            }
        })?;

    debug!("GET_REPORT: {} bytes {:02x?}", len, &buffer[..len]);

    Ok(FeatureReport::try_from(&buffer[..len])?)
}
