//! Exclusive device session
//!
//! A [`Session`] owns an opened handle with the relay's HID interface
//! claimed. Opening detaches a bound kernel driver (usbhid) when possible;
//! closing releases the claim and hands the interface back to that driver.
//! Dropping a session closes it.

use super::transfers;
use crate::error::{OpenStage, RelayError, Result};
use common::{ControlHandle, InterfaceSelection, UsbCandidate};
use protocol::{Command, FeatureReport, UsbError};
use std::time::Duration;
use tracing::{debug, warn};

/// Opened device with its interface claimed
pub struct Session<H: ControlHandle> {
    /// Device handle, `None` once closed
    handle: Option<H>,
    selection: InterfaceSelection,
    /// Set once the interface claim succeeded
    claimed: bool,
    /// Set when we detached a kernel driver and must reattach it
    detached_driver: bool,
    bus_number: u8,
    device_address: u8,
}

impl<H: ControlHandle> Session<H> {
    /// Open the device and claim the first interface of its first
    /// configuration
    ///
    /// Kernel driver detach is best effort. Any failure after the handle is
    /// opened undoes the steps already taken before returning.
    pub fn open<C>(candidate: &C) -> Result<Self>
    where
        C: UsbCandidate<Handle = H>,
    {
        let selection = candidate
            .interface_selection()
            .map_err(|source| open_failed(OpenStage::Descriptor, source))?;

        let handle = candidate
            .open()
            .map_err(|source| open_failed(OpenStage::Open, source))?;

        let mut session = Self {
            handle: Some(handle),
            selection,
            claimed: false,
            detached_driver: false,
            bus_number: candidate.bus_number(),
            device_address: candidate.device_address(),
        };

        session.detach_kernel_driver();
        session.claim()?;

        debug!(
            "Opened relay at bus {} address {} (configuration {}, interface {}, alt {})",
            session.bus_number,
            session.device_address,
            selection.configuration,
            selection.interface,
            selection.alt_setting
        );
        Ok(session)
    }

    fn detach_kernel_driver(&mut self) {
        let interface = self.selection.interface;
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                match handle.detach_kernel_driver(interface) {
                    Ok(()) => self.detached_driver = true,
                    Err(e) => warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    ),
                }
            }
            Ok(false) => {
                debug!("No kernel driver active on interface {}", interface);
            }
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
            }
        }
    }

    fn claim(&mut self) -> Result<()> {
        let InterfaceSelection {
            configuration,
            interface,
            alt_setting,
        } = self.selection;
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| open_failed(OpenStage::Open, UsbError::NoDevice))?;

        handle
            .set_active_configuration(configuration)
            .map_err(|source| open_failed(OpenStage::Configuration, source))?;

        handle
            .claim_interface(interface)
            .map_err(|source| open_failed(OpenStage::Claim, source))?;
        self.claimed = true;

        handle
            .set_alternate_setting(interface, alt_setting)
            .map_err(|source| open_failed(OpenStage::AltSetting, source))?;

        Ok(())
    }

    /// Interface number feature reports are addressed to
    pub fn interface(&self) -> u8 {
        self.selection.interface
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    /// Write a command with SET_REPORT
    pub fn send_feature_report(&self, command: &Command, timeout: Duration) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(RelayError::TransferFailed {
            request: protocol::SET_REPORT,
            source: UsbError::NoDevice,
        })?;
        transfers::send_feature_report(handle, self.interface(), command, timeout)
    }

    /// Read a response with GET_REPORT
    pub fn read_feature_report(&self, timeout: Duration) -> Result<FeatureReport> {
        let handle = self.handle.as_ref().ok_or(RelayError::TransferFailed {
            request: protocol::GET_REPORT,
            source: UsbError::NoDevice,
        })?;
        transfers::read_feature_report(handle, self.interface(), timeout)
    }

    /// Release the interface and the handle
    ///
    /// Reattaches the kernel driver if this session detached it. Calling
    /// `close` again is a no-op.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            let interface = self.selection.interface;

            if self.claimed {
                if let Err(e) = handle.release_interface(interface) {
                    warn!("Failed to release interface {}: {}", interface, e);
                }
                self.claimed = false;
            }

            if self.detached_driver {
                match handle.attach_kernel_driver(interface) {
                    Ok(()) => debug!("Reattached kernel driver to interface {}", interface),
                    Err(e) => debug!(
                        "Could not reattach kernel driver to interface {}: {}",
                        interface, e
                    ),
                }
                self.detached_driver = false;
            }

            debug!(
                "Closed relay at bus {} address {}",
                self.bus_number, self.device_address
            );
        }
    }
}

impl<H: ControlHandle> Drop for Session<H> {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_failed(stage: OpenStage, source: UsbError) -> RelayError {
    warn!("Failed {}: {}", stage, source);
    RelayError::OpenFailed { stage, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MOCK_CONFIGURATION, MockRelay};
    use protocol::{GET_PORT, OPCODE_GET_PORT};

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn test_open_claims_first_interface() {
        let relay = MockRelay::new(1);
        let session = Session::open(&relay).unwrap();

        assert!(session.is_open());
        assert_eq!(session.interface(), 0);
        let state = relay.state();
        assert!(state.claimed);
        assert_eq!(state.configuration, Some(MOCK_CONFIGURATION));
        assert_eq!(state.alt_setting, Some(0));
        assert_eq!(state.detach_count, 1);
    }

    #[test]
    fn test_drop_releases_and_reattaches() {
        let relay = MockRelay::new(1);
        {
            let _session = Session::open(&relay).unwrap();
            assert!(relay.is_claimed());
        }

        let state = relay.state();
        assert!(!state.claimed);
        assert_eq!(state.release_count, 1);
        assert_eq!(state.attach_count, 1);
        assert!(state.kernel_driver);
    }

    #[test]
    fn test_close_is_idempotent() {
        let relay = MockRelay::new(1);
        let mut session = Session::open(&relay).unwrap();

        session.close();
        session.close();
        drop(session);

        assert_eq!(relay.state().release_count, 1);
        assert_eq!(relay.state().attach_count, 1);
    }

    #[test]
    fn test_no_reattach_without_detach() {
        let relay = MockRelay::new(1).with_kernel_driver(false);
        let session = Session::open(&relay).unwrap();
        drop(session);

        assert_eq!(relay.state().detach_count, 0);
        assert_eq!(relay.state().attach_count, 0);
        assert!(!relay.state().kernel_driver);
    }

    #[test]
    fn test_detach_failure_is_not_fatal() {
        let relay = MockRelay::new(1).failing_detach(UsbError::Access);
        let session = Session::open(&relay).unwrap();

        assert!(relay.is_claimed());
        drop(session);
        assert_eq!(relay.state().attach_count, 0);
    }

    #[test]
    fn test_open_failure() {
        let relay = MockRelay::new(1).failing_open(UsbError::Access);
        let err = Session::open(&relay).err().unwrap();

        assert_eq!(
            err,
            RelayError::OpenFailed {
                stage: OpenStage::Open,
                source: UsbError::Access
            }
        );
    }

    #[test]
    fn test_claim_failure_restores_driver() {
        let relay = MockRelay::new(1).failing_claim(UsbError::Busy);
        let err = Session::open(&relay).err().unwrap();

        assert_eq!(
            err,
            RelayError::OpenFailed {
                stage: OpenStage::Claim,
                source: UsbError::Busy
            }
        );
        let state = relay.state();
        assert_eq!(state.release_count, 0);
        assert_eq!(state.attach_count, 1);
    }

    #[test]
    fn test_alt_setting_failure_releases_claim() {
        let relay = MockRelay::new(1).failing_alt_setting(UsbError::Pipe);
        let err = Session::open(&relay).err().unwrap();

        assert!(matches!(
            err,
            RelayError::OpenFailed {
                stage: OpenStage::AltSetting,
                ..
            }
        ));
        assert!(!relay.is_claimed());
        assert_eq!(relay.state().release_count, 1);
    }

    #[test]
    fn test_configuration_failure() {
        let relay = MockRelay::new(1).failing_configuration(UsbError::Busy);
        let err = Session::open(&relay).err().unwrap();

        assert!(matches!(
            err,
            RelayError::OpenFailed {
                stage: OpenStage::Configuration,
                ..
            }
        ));
        assert_eq!(relay.state().claim_count, 0);
    }

    #[test]
    fn test_transfers_after_close_fail() {
        let relay = MockRelay::new(1);
        let mut session = Session::open(&relay).unwrap();
        session.close();

        let err = session.send_feature_report(&GET_PORT, TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            RelayError::TransferFailed {
                source: UsbError::NoDevice,
                ..
            }
        ));
        assert!(session.read_feature_report(TIMEOUT).is_err());
        assert!(relay.transfers().is_empty());
    }

    #[test]
    fn test_session_exchange() {
        let relay = MockRelay::new(1).with_port(true);
        let session = Session::open(&relay).unwrap();

        session.send_feature_report(&GET_PORT, TIMEOUT).unwrap();
        let report = session.read_feature_report(TIMEOUT).unwrap();

        assert_eq!(report.as_bytes()[0], OPCODE_GET_PORT);
        assert!(report.port_state());
    }
}
