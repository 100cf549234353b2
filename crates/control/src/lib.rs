//! Control of MP709 USB HID relays
//!
//! Layers, bottom-up:
//! - [`usb`]: exclusive session on a relay's HID interface and the feature
//!   report transfers issued through it
//! - [`relay`]: identification and the relay operations of one board
//! - [`fleet`]: discovery of every matching board and application of a
//!   target state
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBackend, MockRelay};
//! use control::{FleetController, RelaySettings, TargetFilter, TargetState};
//! use tracing::Span;
//!
//! let relay = MockRelay::new(3758);
//! let fleet = FleetController::new(
//!     MockBackend::new(vec![relay.clone()]),
//!     RelaySettings::default(),
//!     Span::none(),
//! );
//!
//! let statuses = fleet.run(TargetState::On, TargetFilter(3758)).unwrap();
//! assert!(statuses[0].port_on);
//! assert!(relay.port_on());
//! ```

pub mod error;
pub mod fleet;
pub mod relay;
pub mod usb;

pub use error::{OpenStage, RejectReason, RelayError, Result};
pub use fleet::{ClientFor, FleetController, RelaySettings, TargetState};
pub use relay::{RelayClient, TargetFilter, matches_identity};
pub use usb::{DEFAULT_TIMEOUT, Session};
