//! Relay protocol client
//!
//! Validates that a candidate is one of our relays, optionally the one with a
//! requested id, and exposes the relay operations over its session:
//!
//! | operation  | transfers                          |
//! |------------|------------------------------------|
//! | `get_info` | SET_REPORT GET_INFO, GET_REPORT    |
//! | `get_port` | SET_REPORT GET_PORT, GET_REPORT    |
//! | `set_port` | SET_REPORT SET_PORT_ON/OFF         |

use crate::error::{RejectReason, RelayError, Result};
use crate::usb::Session;
use common::{ControlHandle, UsbCandidate};
use protocol::{
    DeviceInfo, GET_INFO, GET_PORT, RELAY_PRODUCT_ID, RELAY_VENDOR_ID, RelayStatus,
    set_port_command,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{Span, debug, info_span, trace};

/// Whether a USB identity belongs to the relay family
pub fn matches_identity(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == RELAY_VENDOR_ID && product_id == RELAY_PRODUCT_ID
}

/// Selects relays by the id they report; 0 selects every relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetFilter(pub u32);

impl TargetFilter {
    pub const ANY: TargetFilter = TargetFilter(0);

    pub fn is_any(&self) -> bool {
        self.0 == 0
    }

    /// Whether a relay reporting `id` is selected
    pub fn matches(&self, id: u32) -> bool {
        self.is_any() || self.0 == id
    }
}

impl From<u32> for TargetFilter {
    fn from(id: u32) -> Self {
        TargetFilter(id)
    }
}

impl fmt::Display for TargetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            f.write_str("any")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Client for one identified relay
pub struct RelayClient<H: ControlHandle> {
    session: Session<H>,
    timeout: Duration,
    span: Span,
}

impl<H: ControlHandle> RelayClient<H> {
    /// Identify a candidate and open a session on it
    ///
    /// Devices outside the relay family are rejected without being opened.
    /// With a non-zero filter the relay is asked for its id and released
    /// again when it does not match.
    pub fn identify<C>(
        candidate: &C,
        filter: TargetFilter,
        timeout: Duration,
        parent: &Span,
    ) -> Result<Self>
    where
        C: UsbCandidate<Handle = H>,
    {
        let (vendor_id, product_id) = (candidate.vendor_id(), candidate.product_id());
        if !matches_identity(vendor_id, product_id) {
            trace!(
                "Ignoring {:04x}:{:04x} at bus {} address {}",
                vendor_id,
                product_id,
                candidate.bus_number(),
                candidate.device_address()
            );
            return Err(RelayError::Rejected(RejectReason::WrongIdentity {
                vendor_id,
                product_id,
            }));
        }

        let span = info_span!(
            parent: parent,
            "relay",
            bus = candidate.bus_number(),
            address = candidate.device_address()
        );
        let session = span.in_scope(|| Session::open(candidate))?;

        let mut client = Self {
            session,
            timeout,
            span,
        };

        if !filter.is_any() {
            let info = client.get_info()?;
            if !filter.matches(info.id) {
                client.span.in_scope(|| {
                    debug!("Relay id {} does not match filter {}", info.id, filter)
                });
                client.release();
                return Err(RelayError::Rejected(RejectReason::IdMismatch {
                    expected: filter.0,
                    actual: info.id,
                }));
            }
        }

        Ok(client)
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn bus_number(&self) -> u8 {
        self.session.bus_number()
    }

    pub fn device_address(&self) -> u8 {
        self.session.device_address()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn get_info(&self) -> Result<DeviceInfo> {
        self.get_info_with_timeout(self.timeout)
    }

    /// Query family, firmware version and id
    pub fn get_info_with_timeout(&self, timeout: Duration) -> Result<DeviceInfo> {
        let _enter = self.span.enter();
        self.session.send_feature_report(&GET_INFO, timeout)?;
        let info = self.session.read_feature_report(timeout)?.device_info();
        debug!(
            "Relay info: family={}, version={}, id={}",
            info.family, info.version, info.id
        );
        Ok(info)
    }

    pub fn get_port(&self) -> Result<bool> {
        self.get_port_with_timeout(self.timeout)
    }

    /// Query the relay contact
    ///
    /// The GET_PORT command primes the response; it must be written before
    /// the read.
    pub fn get_port_with_timeout(&self, timeout: Duration) -> Result<bool> {
        let _enter = self.span.enter();
        self.session.send_feature_report(&GET_PORT, timeout)?;
        let on = self.session.read_feature_report(timeout)?.port_state();
        debug!("Relay port is {}", if on { "on" } else { "off" });
        Ok(on)
    }

    pub fn set_port(&self, on: bool) -> Result<()> {
        self.set_port_with_timeout(on, self.timeout)
    }

    /// Switch the relay contact; nothing is read back
    pub fn set_port_with_timeout(&self, on: bool, timeout: Duration) -> Result<()> {
        let _enter = self.span.enter();
        debug!("Switching relay {}", if on { "on" } else { "off" });
        self.session.send_feature_report(&set_port_command(on), timeout)
    }

    /// Current info and contact state
    pub fn status(&self) -> Result<RelayStatus> {
        let info = self.get_info()?;
        let port_on = self.get_port()?;

        Ok(RelayStatus {
            bus_number: self.bus_number(),
            device_address: self.device_address(),
            info,
            port_on,
        })
    }

    /// Human-readable status line
    pub fn describe(&self) -> Result<String> {
        self.status().map(|status| status.to_string())
    }

    /// Close the session; later calls are no-ops
    pub fn release(&mut self) {
        let _enter = self.span.enter();
        self.session.close();
    }
}

impl<H: ControlHandle> fmt::Debug for RelayClient<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayClient")
            .field("bus_number", &self.bus_number())
            .field("device_address", &self.device_address())
            .field("open", &self.is_open())
            .field("timeout", &self.timeout)
            .finish()
    }
}
