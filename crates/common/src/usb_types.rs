//! USB transport abstraction
//!
//! The relay layers never talk to libusb directly. They enumerate candidates
//! through [`UsbBackend`], inspect and open them through [`UsbCandidate`], and
//! perform every claim and control transfer through [`ControlHandle`]. The
//! rusb-backed implementation lives here; `test_utils` provides a scripted
//! one.

use protocol::UsbError;
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::cell::OnceCell;
use std::time::Duration;
use tracing::debug;

pub type UsbResult<T> = std::result::Result<T, UsbError>;

/// Configuration, interface and alternate setting a session binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceSelection {
    /// bConfigurationValue of the selected configuration
    pub configuration: u8,
    /// bInterfaceNumber of the selected interface
    pub interface: u8,
    /// bAlternateSetting of the selected interface
    pub alt_setting: u8,
}

/// An opened device on which interfaces can be claimed and control
/// transfers issued
pub trait ControlHandle {
    fn kernel_driver_active(&self, interface: u8) -> UsbResult<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> UsbResult<()>;
    fn attach_kernel_driver(&mut self, interface: u8) -> UsbResult<()>;
    fn set_active_configuration(&mut self, configuration: u8) -> UsbResult<()>;
    fn claim_interface(&mut self, interface: u8) -> UsbResult<()>;
    fn release_interface(&mut self, interface: u8) -> UsbResult<()>;
    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> UsbResult<()>;

    /// Host-to-device control transfer, returns the number of bytes written
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> UsbResult<usize>;

    /// Device-to-host control transfer, returns the number of bytes read
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> UsbResult<usize>;
}

/// A device seen during enumeration, not yet opened
pub trait UsbCandidate {
    type Handle: ControlHandle;

    fn vendor_id(&self) -> u16;
    fn product_id(&self) -> u16;
    fn bus_number(&self) -> u8;
    fn device_address(&self) -> u8;

    /// First interface of the first configuration
    fn interface_selection(&self) -> UsbResult<InterfaceSelection>;

    fn open(&self) -> UsbResult<Self::Handle>;
}

/// Source of candidate devices, in bus enumeration order
pub trait UsbBackend {
    type Candidate: UsbCandidate;

    fn candidates(&self) -> UsbResult<Vec<Self::Candidate>>;
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

/// libusb-backed device source
///
/// The libusb context is created by the first enumeration, so constructing a
/// backend never touches the bus.
#[derive(Default)]
pub struct RusbBackend {
    context: OnceCell<Context>,
}

impl RusbBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self) -> UsbResult<&Context> {
        if let Some(context) = self.context.get() {
            return Ok(context);
        }

        let context = Context::new().map_err(map_rusb_error)?;
        debug!("Initialized libusb context");
        Ok(self.context.get_or_init(|| context))
    }
}

impl UsbBackend for RusbBackend {
    type Candidate = RusbCandidate<Context>;

    fn candidates(&self) -> UsbResult<Vec<Self::Candidate>> {
        let devices = self.context()?.devices().map_err(map_rusb_error)?;

        let mut candidates = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            match RusbCandidate::new(device) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => debug!("Skipping device without readable descriptor: {}", e),
            }
        }

        debug!("Enumerated {} devices", candidates.len());
        Ok(candidates)
    }
}

/// rusb device with its cached identity
pub struct RusbCandidate<T: UsbContext> {
    device: Device<T>,
    vendor_id: u16,
    product_id: u16,
}

impl<T: UsbContext> RusbCandidate<T> {
    /// Reads and caches the device descriptor.
    pub fn new(device: Device<T>) -> UsbResult<Self> {
        let descriptor = device.device_descriptor().map_err(map_rusb_error)?;

        Ok(Self {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            device,
        })
    }
}

impl<T: UsbContext> UsbCandidate for RusbCandidate<T> {
    type Handle = DeviceHandle<T>;

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    fn device_address(&self) -> u8 {
        self.device.address()
    }

    fn interface_selection(&self) -> UsbResult<InterfaceSelection> {
        let config = self.device.config_descriptor(0).map_err(map_rusb_error)?;

        let descriptor = config
            .interfaces()
            .next()
            .and_then(|interface| interface.descriptors().next())
            .ok_or(UsbError::NotFound)?;

        Ok(InterfaceSelection {
            configuration: config.number(),
            interface: descriptor.interface_number(),
            alt_setting: descriptor.setting_number(),
        })
    }

    fn open(&self) -> UsbResult<Self::Handle> {
        self.device.open().map_err(map_rusb_error)
    }
}

impl<T: UsbContext> ControlHandle for DeviceHandle<T> {
    fn kernel_driver_active(&self, interface: u8) -> UsbResult<bool> {
        DeviceHandle::kernel_driver_active(self, interface).map_err(map_rusb_error)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        DeviceHandle::detach_kernel_driver(self, interface).map_err(map_rusb_error)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        DeviceHandle::attach_kernel_driver(self, interface).map_err(map_rusb_error)
    }

    fn set_active_configuration(&mut self, configuration: u8) -> UsbResult<()> {
        DeviceHandle::set_active_configuration(self, configuration).map_err(map_rusb_error)
    }

    fn claim_interface(&mut self, interface: u8) -> UsbResult<()> {
        DeviceHandle::claim_interface(self, interface).map_err(map_rusb_error)
    }

    fn release_interface(&mut self, interface: u8) -> UsbResult<()> {
        DeviceHandle::release_interface(self, interface).map_err(map_rusb_error)
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> UsbResult<()> {
        DeviceHandle::set_alternate_setting(self, interface, setting).map_err(map_rusb_error)
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
        DeviceHandle::write_control(self, request_type, request, value, index, data, timeout)
            .map_err(map_rusb_error)
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
        DeviceHandle::read_control(self, request_type, request, value, index, buf, timeout)
            .map_err(map_rusb_error)
    }
}
