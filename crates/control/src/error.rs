//! Relay control error types

use protocol::{ProtocolError, UsbError};
use std::fmt;
use thiserror::Error;

/// Why a candidate device was excluded from the controlled set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Vendor/product id is not the relay family's
    WrongIdentity { vendor_id: u16, product_id: u16 },
    /// Relay reported an id other than the requested one
    IdMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::WrongIdentity {
                vendor_id,
                product_id,
            } => write!(f, "not a relay ({:04x}:{:04x})", vendor_id, product_id),
            RejectReason::IdMismatch { expected, actual } => {
                write!(f, "id {} does not match requested id {}", actual, expected)
            }
        }
    }
}

/// Step of session setup that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    Descriptor,
    Open,
    Configuration,
    Claim,
    AltSetting,
}

impl fmt::Display for OpenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            OpenStage::Descriptor => "reading configuration descriptor",
            OpenStage::Open => "opening device",
            OpenStage::Configuration => "setting configuration",
            OpenStage::Claim => "claiming interface",
            OpenStage::AltSetting => "selecting alternate setting",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Device rejected: {0}")]
    Rejected(RejectReason),

    #[error("Failed {stage}: {source}")]
    OpenFailed {
        stage: OpenStage,
        #[source]
        source: UsbError,
    },

    #[error("Feature report transfer failed (request {request:#04x}): {source}")]
    TransferFailed {
        request: u8,
        #[source]
        source: UsbError,
    },

    #[error(transparent)]
    MalformedResponse(#[from] ProtocolError),

    #[error("Unsupported state '{0}', expected one of: on, off, noChange, toggle")]
    UnknownState(String),

    #[error("No relay found")]
    NoDeviceFound,

    #[error("USB enumeration failed: {0}")]
    Enumeration(#[source] UsbError),
}

impl RelayError {
    /// Whether the device was excluded rather than failing
    pub fn is_rejection(&self) -> bool {
        matches!(self, RelayError::Rejected(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
