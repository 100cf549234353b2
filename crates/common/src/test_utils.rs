//! Test utilities for mp709
//!
//! Provides a scripted USB transport that behaves like MP709 relay firmware,
//! so sessions, relay clients and the fleet controller can be exercised
//! without hardware. Every transfer is recorded for later inspection.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBackend, MockRelay};
//! use common::UsbBackend;
//!
//! let relay = MockRelay::new(3758).with_port(true);
//! let backend = MockBackend::new(vec![relay.clone()]);
//!
//! assert_eq!(backend.candidates().unwrap().len(), 1);
//! assert!(relay.port_on());
//! ```

use crate::usb_types::{ControlHandle, InterfaceSelection, UsbBackend, UsbCandidate, UsbResult};
use protocol::{
    DeviceInfo, GET_REPORT, HID_REQ_TO_DEV, HID_REQ_TO_HOST, OPCODE_GET_INFO, OPCODE_GET_PORT,
    OPCODE_SET_PORT, PORT_OFF, PORT_ON, RELAY_PRODUCT_ID, RELAY_VENDOR_ID, REPORT_LEN, REPORT_TYPE_FEATURE, SET_REPORT, UsbError,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// Interface number the mock relay exposes
pub const MOCK_INTERFACE: u8 = 0;
/// Configuration value the mock relay exposes
pub const MOCK_CONFIGURATION: u8 = 1;

/// One control transfer observed by a mock relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Bytes written, or bytes returned for reads
    pub data: Vec<u8>,
    pub timeout: Duration,
}

impl RecordedTransfer {
    pub fn is_write(&self) -> bool {
        self.request_type & 0x80 == 0
    }

    pub fn opcode(&self) -> Option<u8> {
        if self.is_write() {
            self.data.first().copied()
        } else {
            None
        }
    }
}

/// Shared state of a mock relay
#[derive(Debug)]
pub struct MockRelayState {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub info: DeviceInfo,
    pub port_on: bool,
    /// Whether a kernel driver is bound to the interface
    pub kernel_driver: bool,
    pub open_count: usize,
    pub configuration: Option<u8>,
    pub claimed: bool,
    pub claim_count: usize,
    pub release_count: usize,
    pub alt_setting: Option<u8>,
    pub detach_count: usize,
    pub attach_count: usize,
    pub transfers: Vec<RecordedTransfer>,
    /// Response queued by the last query command
    pub pending: [u8; REPORT_LEN],
    /// Number of bytes returned by GET_REPORT
    pub response_len: usize,

    pub fail_open: Option<UsbError>,
    pub fail_detach: Option<UsbError>,
    pub fail_configuration: Option<UsbError>,
    pub fail_claim: Option<UsbError>,
    pub fail_alt_setting: Option<UsbError>,
    /// Fail every transfer once this many have succeeded
    pub fail_transfers_after: Option<(usize, UsbError)>,
}

/// Scripted relay board; clones share state
#[derive(Debug, Clone)]
pub struct MockRelay {
    state: Rc<RefCell<MockRelayState>>,
}

impl MockRelay {
    /// Create a relay with the family's identity and the given device id
    pub fn new(id: u32) -> Self {
        let state = MockRelayState {
            vendor_id: RELAY_VENDOR_ID,
            product_id: RELAY_PRODUCT_ID,
            bus_number: 1,
            device_address: (id % 127) as u8 + 1,
            info: DeviceInfo {
                family: 1,
                version: 0x0102,
                id,
            },
            port_on: false,
            kernel_driver: true,
            open_count: 0,
            configuration: None,
            claimed: false,
            claim_count: 0,
            release_count: 0,
            alt_setting: None,
            detach_count: 0,
            attach_count: 0,
            transfers: Vec::new(),
            pending: [0; REPORT_LEN],
            response_len: REPORT_LEN,
            fail_open: None,
            fail_detach: None,
            fail_configuration: None,
            fail_claim: None,
            fail_alt_setting: None,
            fail_transfers_after: None,
        };

        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn with_identity(self, vendor_id: u16, product_id: u16) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.vendor_id = vendor_id;
            state.product_id = product_id;
        }
        self
    }

    pub fn with_location(self, bus_number: u8, device_address: u8) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.bus_number = bus_number;
            state.device_address = device_address;
        }
        self
    }

    pub fn with_port(self, on: bool) -> Self {
        self.state.borrow_mut().port_on = on;
        self
    }

    pub fn with_kernel_driver(self, bound: bool) -> Self {
        self.state.borrow_mut().kernel_driver = bound;
        self
    }

    pub fn with_response_len(self, len: usize) -> Self {
        self.state.borrow_mut().response_len = len;
        self
    }

    pub fn failing_open(self, error: UsbError) -> Self {
        self.state.borrow_mut().fail_open = Some(error);
        self
    }

    pub fn failing_detach(self, error: UsbError) -> Self {
        self.state.borrow_mut().fail_detach = Some(error);
        self
    }

    pub fn failing_configuration(self, error: UsbError) -> Self {
        self.state.borrow_mut().fail_configuration = Some(error);
        self
    }

    pub fn failing_claim(self, error: UsbError) -> Self {
        self.state.borrow_mut().fail_claim = Some(error);
        self
    }

    pub fn failing_alt_setting(self, error: UsbError) -> Self {
        self.state.borrow_mut().fail_alt_setting = Some(error);
        self
    }

    pub fn failing_transfers_after(self, successes: usize, error: UsbError) -> Self {
        self.state.borrow_mut().fail_transfers_after = Some((successes, error));
        self
    }

    /// Inspect the shared state
    pub fn state(&self) -> std::cell::Ref<'_, MockRelayState> {
        self.state.borrow()
    }

    pub fn port_on(&self) -> bool {
        self.state.borrow().port_on
    }

    pub fn is_claimed(&self) -> bool {
        self.state.borrow().claimed
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.state.borrow().transfers.clone()
    }

    /// Opcodes of every command written, in order
    pub fn written_opcodes(&self) -> Vec<u8> {
        self.state
            .borrow()
            .transfers
            .iter()
            .filter_map(RecordedTransfer::opcode)
            .collect()
    }

    /// Requested states of every SET_PORT command, in order
    pub fn set_port_writes(&self) -> Vec<bool> {
        self.state
            .borrow()
            .transfers
            .iter()
            .filter(|t| t.opcode() == Some(OPCODE_SET_PORT))
            .map(|t| t.data.get(1).copied() == Some(PORT_ON))
            .collect()
    }

    /// Number of GET_PORT commands written
    pub fn get_port_queries(&self) -> usize {
        self.count_opcode(OPCODE_GET_PORT)
    }

    /// Number of GET_INFO commands written
    pub fn get_info_queries(&self) -> usize {
        self.count_opcode(OPCODE_GET_INFO)
    }

    fn count_opcode(&self, opcode: u8) -> usize {
        self.state
            .borrow()
            .transfers
            .iter()
            .filter(|t| t.opcode() == Some(opcode))
            .count()
    }
}

impl UsbCandidate for MockRelay {
    type Handle = MockHandle;

    fn vendor_id(&self) -> u16 {
        self.state.borrow().vendor_id
    }

    fn product_id(&self) -> u16 {
        self.state.borrow().product_id
    }

    fn bus_number(&self) -> u8 {
        self.state.borrow().bus_number
    }

    fn device_address(&self) -> u8 {
        self.state.borrow().device_address
    }

    fn interface_selection(&self) -> UsbResult<InterfaceSelection> {
        Ok(InterfaceSelection {
            configuration: MOCK_CONFIGURATION,
            interface: MOCK_INTERFACE,
            alt_setting: 0,
        })
    }

    fn open(&self) -> UsbResult<Self::Handle> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_open.clone() {
            return Err(error);
        }
        state.open_count += 1;

        Ok(MockHandle {
            state: Rc::clone(&self.state),
        })
    }
}

/// Open handle to a [`MockRelay`]
#[derive(Debug)]
pub struct MockHandle {
    state: Rc<RefCell<MockRelayState>>,
}

impl MockHandle {
    fn check_interface(interface: u8) -> UsbResult<()> {
        if interface == MOCK_INTERFACE {
            Ok(())
        } else {
            Err(UsbError::NotFound)
        }
    }

    fn check_transfer_budget(state: &MockRelayState) -> UsbResult<()> {
        match &state.fail_transfers_after {
            Some((successes, error)) if state.transfers.len() >= *successes => {
                Err(error.clone())
            }
            _ => Ok(()),
        }
    }
}

impl ControlHandle for MockHandle {
    fn kernel_driver_active(&self, interface: u8) -> UsbResult<bool> {
        Self::check_interface(interface)?;
        Ok(self.state.borrow().kernel_driver)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        Self::check_interface(interface)?;
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_detach.clone() {
            return Err(error);
        }
        if !state.kernel_driver {
            return Err(UsbError::NotFound);
        }
        state.kernel_driver = false;
        state.detach_count += 1;
        Ok(())
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        Self::check_interface(interface)?;
        let mut state = self.state.borrow_mut();
        if state.kernel_driver {
            return Err(UsbError::Busy);
        }
        state.kernel_driver = true;
        state.attach_count += 1;
        Ok(())
    }

    fn set_active_configuration(&mut self, configuration: u8) -> UsbResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_configuration.clone() {
            return Err(error);
        }
        if configuration != MOCK_CONFIGURATION {
            return Err(UsbError::NotFound);
        }
        state.configuration = Some(configuration);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> UsbResult<()> {
        Self::check_interface(interface)?;
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_claim.clone() {
            return Err(error);
        }
        if state.claimed {
            return Err(UsbError::Busy);
        }
        state.claimed = true;
        state.claim_count += 1;
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> UsbResult<()> {
        Self::check_interface(interface)?;
        let mut state = self.state.borrow_mut();
        if !state.claimed {
            return Err(UsbError::NotFound);
        }
        state.claimed = false;
        state.release_count += 1;
        Ok(())
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> UsbResult<()> {
        Self::check_interface(interface)?;
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_alt_setting.clone() {
            return Err(error);
        }
        if !state.claimed {
            return Err(UsbError::NotFound);
        }
        state.alt_setting = Some(setting);
        Ok(())
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> UsbResult<usize> {
        let mut state = self.state.borrow_mut();
        Self::check_transfer_budget(&state)?;

        if request_type != HID_REQ_TO_DEV
            || request != SET_REPORT
            || value != REPORT_TYPE_FEATURE
            || index != u16::from(MOCK_INTERFACE)
            || data.is_empty()
        {
            return Err(UsbError::Pipe);
        }

        state.transfers.push(RecordedTransfer {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
            timeout,
        });

        let family = state.info.family;
        let id = state.info.id.to_be_bytes();
        let version = state.info.version.to_le_bytes();
        match data[0] {
            OPCODE_GET_INFO => {
                state.pending = [
                    OPCODE_GET_INFO,
                    family,
                    version[0],
                    version[1],
                    id[0],
                    id[1],
                    id[2],
                    id[3],
                ];
            }
            OPCODE_GET_PORT => {
                let status = if state.port_on { PORT_ON } else { PORT_OFF };
                state.pending = [OPCODE_GET_PORT, status, status, 0, 0, 0, 0, 0];
            }
            OPCODE_SET_PORT => {
                state.port_on = data.get(1).copied() == Some(PORT_ON);
            }
            _ => {}
        }

        Ok(data.len())
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> UsbResult<usize> {
        let mut state = self.state.borrow_mut();
        Self::check_transfer_budget(&state)?;

        if request_type != HID_REQ_TO_HOST
            || request != GET_REPORT
            || value != REPORT_TYPE_FEATURE
            || index != u16::from(MOCK_INTERFACE)
        {
            return Err(UsbError::Pipe);
        }

        let len = state.response_len.min(REPORT_LEN).min(buf.len());
        buf[..len].copy_from_slice(&state.pending[..len]);

        state.transfers.push(RecordedTransfer {
            request_type,
            request,
            value,
            index,
            data: buf[..len].to_vec(),
            timeout,
        });

        Ok(len)
    }
}

/// Scripted device source
#[derive(Debug, Default)]
pub struct MockBackend {
    relays: Vec<MockRelay>,
    enumerations: Cell<usize>,
    fail_enumeration: Option<UsbError>,
}

impl MockBackend {
    pub fn new(relays: Vec<MockRelay>) -> Self {
        Self {
            relays,
            enumerations: Cell::new(0),
            fail_enumeration: None,
        }
    }

    pub fn failing(error: UsbError) -> Self {
        Self {
            relays: Vec::new(),
            enumerations: Cell::new(0),
            fail_enumeration: Some(error),
        }
    }

    /// Number of times the bus was enumerated
    pub fn enumerations(&self) -> usize {
        self.enumerations.get()
    }
}

impl UsbBackend for MockBackend {
    type Candidate = MockRelay;

    fn candidates(&self) -> UsbResult<Vec<Self::Candidate>> {
        self.enumerations.set(self.enumerations.get() + 1);
        if let Some(error) = &self.fail_enumeration {
            return Err(error.clone());
        }
        Ok(self.relays.clone())
    }
}

/// Create a relay with the given id, switched on or off
pub fn create_mock_relay(id: u32, port_on: bool) -> MockRelay {
    MockRelay::new(id).with_port(port_on)
}

/// Create a device with a foreign identity, e.g. a keyboard
pub fn create_foreign_device(vendor_id: u16, product_id: u16) -> MockRelay {
    MockRelay::new(0).with_identity(vendor_id, product_id)
}

/// Create `count` relays with ids 1..=count on distinct addresses
pub fn create_mock_relay_list(count: u32) -> Vec<MockRelay> {
    (1..=count)
        .map(|i| MockRelay::new(i).with_location(1, i as u8 + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn open_claimed(relay: &MockRelay) -> MockHandle {
        let mut handle = relay.open().unwrap();
        handle.detach_kernel_driver(MOCK_INTERFACE).unwrap();
        handle.claim_interface(MOCK_INTERFACE).unwrap();
        handle
    }

    #[test]
    fn test_claim_is_exclusive() {
        let relay = MockRelay::new(1);
        let mut handle = relay.open().unwrap();
        assert!(handle.claim_interface(MOCK_INTERFACE).is_ok());
        assert!(relay.is_claimed());
        assert_eq!(handle.claim_interface(MOCK_INTERFACE), Err(UsbError::Busy));

        handle.release_interface(MOCK_INTERFACE).unwrap();
        assert!(!relay.is_claimed());
        assert_eq!(relay.state().release_count, 1);
    }

    #[test]
    fn test_detach_and_reattach_driver() {
        let relay = MockRelay::new(1);
        let mut handle = relay.open().unwrap();
        assert!(handle.kernel_driver_active(MOCK_INTERFACE).unwrap());

        handle.detach_kernel_driver(MOCK_INTERFACE).unwrap();
        assert!(!handle.kernel_driver_active(MOCK_INTERFACE).unwrap());
        assert_eq!(
            handle.detach_kernel_driver(MOCK_INTERFACE),
            Err(UsbError::NotFound)
        );

        handle.attach_kernel_driver(MOCK_INTERFACE).unwrap();
        assert_eq!(relay.state().attach_count, 1);
    }

    #[test]
    fn test_info_query_response() {
        let relay = MockRelay::new(0x0102_0304);
        let handle = open_claimed(&relay);

        handle
            .write_control(
                HID_REQ_TO_DEV,
                SET_REPORT,
                REPORT_TYPE_FEATURE,
                0,
                &protocol::GET_INFO,
                TIMEOUT,
            )
            .unwrap();

        let mut buf = [0u8; REPORT_LEN];
        let n = handle
            .read_control(
                HID_REQ_TO_HOST,
                GET_REPORT,
                REPORT_TYPE_FEATURE,
                0,
                &mut buf,
                TIMEOUT,
            )
            .unwrap();

        assert_eq!(n, REPORT_LEN);
        assert_eq!(&buf[4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_set_port_changes_state() {
        let relay = MockRelay::new(1).with_port(false);
        let handle = open_claimed(&relay);

        handle
            .write_control(
                HID_REQ_TO_DEV,
                SET_REPORT,
                REPORT_TYPE_FEATURE,
                0,
                &protocol::SET_PORT_ON,
                TIMEOUT,
            )
            .unwrap();

        assert!(relay.port_on());
        assert_eq!(relay.set_port_writes(), vec![true]);
    }

    #[test]
    fn test_wrong_request_stalls() {
        let relay = MockRelay::new(1);
        let handle = open_claimed(&relay);

        let result = handle.write_control(0x00, SET_REPORT, 0, 0, &[1], TIMEOUT);
        assert_eq!(result, Err(UsbError::Pipe));
        assert!(relay.transfers().is_empty());
    }

    #[test]
    fn test_transfer_budget() {
        let relay = MockRelay::new(1).failing_transfers_after(1, UsbError::Timeout);
        let handle = open_claimed(&relay);

        let write = |command: &[u8]| {
            handle.write_control(
                HID_REQ_TO_DEV,
                SET_REPORT,
                REPORT_TYPE_FEATURE,
                0,
                command,
                TIMEOUT,
            )
        };

        assert!(write(&protocol::GET_PORT).is_ok());
        assert_eq!(write(&protocol::GET_PORT), Err(UsbError::Timeout));
    }

    #[test]
    fn test_backend_counts_enumerations() {
        let backend = MockBackend::new(create_mock_relay_list(3));
        assert_eq!(backend.enumerations(), 0);
        assert_eq!(backend.candidates().unwrap().len(), 3);
        assert_eq!(backend.enumerations(), 1);

        let failing = MockBackend::failing(UsbError::Access);
        assert_eq!(failing.candidates().unwrap_err(), UsbError::Access);
    }
}
