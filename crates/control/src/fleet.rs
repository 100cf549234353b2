//! Fleet controller
//!
//! Enumerates the bus, keeps the relays that identify successfully and
//! applies one target state to each of them in enumeration order. Processing
//! is sequential; the first failing relay stops the pass and relays already
//! switched stay switched.

use crate::error::{RelayError, Result};
use crate::relay::{RelayClient, TargetFilter};
use crate::usb::DEFAULT_TIMEOUT;
use common::{ControlHandle, UsbBackend, UsbCandidate};
use protocol::RelayStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{Span, debug, error, info, trace, warn};

/// Requested relay state, applied uniformly to every matched relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetState {
    On,
    Off,
    /// Only report the current state
    #[default]
    NoChange,
    /// Read the current state and write its negation
    Toggle,
}

impl TargetState {
    pub const NAMES: [&'static str; 4] = ["on", "off", "noChange", "toggle"];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::On => "on",
            TargetState::Off => "off",
            TargetState::NoChange => "noChange",
            TargetState::Toggle => "toggle",
        }
    }
}

impl FromStr for TargetState {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "on" => Ok(TargetState::On),
            "off" => Ok(TargetState::Off),
            "noChange" => Ok(TargetState::NoChange),
            "toggle" => Ok(TargetState::Toggle),
            other => Err(RelayError::UnknownState(other.to_string())),
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for relay operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Per-transfer timeout
    pub timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Relay client type produced by a backend
pub type ClientFor<B> = RelayClient<<<B as UsbBackend>::Candidate as UsbCandidate>::Handle>;

/// Applies target states to every matching relay on a backend
pub struct FleetController<B: UsbBackend> {
    backend: B,
    settings: RelaySettings,
    span: Span,
}

impl<B: UsbBackend> FleetController<B> {
    /// Create a controller; relay spans are children of `span`
    pub fn new(backend: B, settings: RelaySettings, span: Span) -> Self {
        Self {
            backend,
            settings,
            span,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Identify every candidate and keep the relays selected by `filter`
    ///
    /// Rejected devices are skipped silently. Relays that fail to open or
    /// answer are logged and skipped.
    pub fn discover(&self, filter: TargetFilter) -> Result<Vec<ClientFor<B>>> {
        let _enter = self.span.enter();

        let candidates = self
            .backend
            .candidates()
            .map_err(RelayError::Enumeration)?;

        let mut clients = Vec::new();
        for candidate in &candidates {
            match RelayClient::identify(candidate, filter, self.settings.timeout, &self.span) {
                Ok(client) => {
                    debug!(
                        "Found relay at bus {} address {}",
                        client.bus_number(),
                        client.device_address()
                    );
                    clients.push(client);
                }
                Err(RelayError::Rejected(reason)) => {
                    trace!(
                        "Skipping device at bus {} address {}: {}",
                        candidate.bus_number(),
                        candidate.device_address(),
                        reason
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to identify relay at bus {} address {}: {}",
                        candidate.bus_number(),
                        candidate.device_address(),
                        e
                    );
                }
            }
        }

        debug!(
            "Discovered {} relay(s) matching id {} among {} device(s)",
            clients.len(),
            filter,
            candidates.len()
        );
        Ok(clients)
    }

    /// Apply `state` to each client in order and report their status
    pub fn apply(&self, clients: &[ClientFor<B>], state: TargetState) -> Result<Vec<RelayStatus>> {
        let _enter = self.span.enter();

        let mut statuses = Vec::with_capacity(clients.len());
        for client in clients {
            match apply_one(client, state) {
                Ok(status) => {
                    client.span().in_scope(|| info!("{}", status));
                    statuses.push(status);
                }
                Err(e) => {
                    error!(
                        "Failed to apply state {} to relay at bus {} address {}: {}",
                        state,
                        client.bus_number(),
                        client.device_address(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(statuses)
    }

    /// Discover the relays selected by `filter` and apply `state` to them
    ///
    /// Every session is released before returning.
    pub fn run(&self, state: TargetState, filter: TargetFilter) -> Result<Vec<RelayStatus>> {
        let clients = self.discover(filter)?;
        if clients.is_empty() {
            self.span.in_scope(|| info!("No relay found"));
            return Err(RelayError::NoDeviceFound);
        }

        self.apply(&clients, state)
    }

    /// Like [`run`](Self::run), taking the state by name
    ///
    /// An unknown name fails before the bus is touched.
    pub fn run_named(&self, state: &str, filter: TargetFilter) -> Result<Vec<RelayStatus>> {
        let state = state.parse::<TargetState>().inspect_err(|e| {
            self.span.in_scope(|| error!("{}", e));
        })?;
        self.run(state, filter)
    }
}

fn apply_one<H: ControlHandle>(
    client: &RelayClient<H>,
    state: TargetState,
) -> Result<RelayStatus> {
    match state {
        TargetState::On => client.set_port(true)?,
        TargetState::Off => client.set_port(false)?,
        TargetState::Toggle => {
            let on = client.get_port()?;
            client.set_port(!on)?;
        }
        TargetState::NoChange => {}
    }

    client.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBackend, MockRelay};

    fn controller(relays: Vec<MockRelay>) -> FleetController<MockBackend> {
        FleetController::new(
            MockBackend::new(relays),
            RelaySettings::default(),
            Span::none(),
        )
    }

    #[test]
    fn test_target_state_names() {
        for name in TargetState::NAMES {
            let state: TargetState = name.parse().unwrap();
            assert_eq!(state.as_str(), name);
            assert_eq!(state.to_string(), name);
        }
        assert_eq!(TargetState::default(), TargetState::NoChange);
    }

    #[test]
    fn test_target_state_is_case_sensitive() {
        assert_eq!(
            "NoChange".parse::<TargetState>(),
            Err(RelayError::UnknownState("NoChange".to_string()))
        );
        assert!("ON".parse::<TargetState>().is_err());
        assert!("".parse::<TargetState>().is_err());
    }

    #[test]
    fn test_default_settings() {
        assert_eq!(RelaySettings::default().timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_apply_off_switches_every_relay() {
        let relays = vec![
            MockRelay::new(1).with_port(true),
            MockRelay::new(2).with_port(false),
        ];
        let fleet = controller(relays.clone());

        let clients = fleet.discover(TargetFilter::ANY).unwrap();
        let statuses = fleet.apply(&clients, TargetState::Off).unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| !s.port_on));
        for relay in &relays {
            assert_eq!(relay.set_port_writes(), vec![false]);
        }
    }

    #[test]
    fn test_toggle_reads_before_writing() {
        let relay = MockRelay::new(1).with_port(false);
        let fleet = controller(vec![relay.clone()]);

        let clients = fleet.discover(TargetFilter::ANY).unwrap();
        fleet.apply(&clients, TargetState::Toggle).unwrap();

        let opcodes = relay.written_opcodes();
        assert_eq!(opcodes[0], protocol::OPCODE_GET_PORT);
        assert_eq!(opcodes[1], protocol::OPCODE_SET_PORT);
        assert!(relay.port_on());
    }

    #[test]
    fn test_run_releases_sessions() {
        let relay = MockRelay::new(1);
        let fleet = controller(vec![relay.clone()]);

        fleet.run(TargetState::On, TargetFilter::ANY).unwrap();

        assert!(!relay.is_claimed());
        assert_eq!(relay.state().release_count, 1);
    }
}
