//! Network link lifecycle.
//!
//! The link driver reports discrete lifecycle events; [`LinkFsm`] folds them
//! into a [`LinkState`] whose only consumer contract is [`LinkFsm::is_ready`].
//! Events that do not match the current state are ignored rather than
//! treated as errors, so no transition can be skipped.

use std::fmt;
use std::net::IpAddr;

/// Lifecycle state of the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Uninitialized,
    Disconnected,
    Connected,
    Ready,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            LinkState::Uninitialized => "uninitialized",
            LinkState::Disconnected => "disconnected",
            LinkState::Connected => "connected",
            LinkState::Ready => "ready",
        };
        f.write_str(value)
    }
}

/// Event delivered by the link driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Start,
    Connected,
    Disconnected,
    GotAddress(Option<IpAddr>),
}

/// A transition accepted by the FSM. The driver performs the matching side
/// effect (hostname assignment on start, address reporting, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    Started,
    Connected,
    Disconnected { from: LinkState },
    AddressAssigned(Option<IpAddr>),
}

impl LinkTransition {
    /// State the machine is in after this transition.
    pub fn target(&self) -> LinkState {
        match self {
            LinkTransition::Started | LinkTransition::Disconnected { .. } => {
                LinkState::Disconnected
            }
            LinkTransition::Connected => LinkState::Connected,
            LinkTransition::AddressAssigned(_) => LinkState::Ready,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkFsm {
    state: LinkState,
}

impl LinkFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Guard used by the time-sync engine before starting a timezone query.
    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    /// Apply a link event, returning the accepted transition or `None` when
    /// the event is out of order for the current state.
    pub fn handle(&mut self, event: LinkEvent) -> Option<LinkTransition> {
        let transition = match (self.state, event) {
            (LinkState::Uninitialized, LinkEvent::Start) => LinkTransition::Started,
            (LinkState::Disconnected, LinkEvent::Connected) => LinkTransition::Connected,
            (from @ (LinkState::Connected | LinkState::Ready), LinkEvent::Disconnected) => {
                LinkTransition::Disconnected { from }
            }
            (LinkState::Connected, LinkEvent::GotAddress(addr)) => {
                LinkTransition::AddressAssigned(addr)
            }
            _ => return None,
        };
        self.state = transition.target();
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
    }

    #[test]
    fn full_bring_up_reaches_ready() {
        let mut fsm = LinkFsm::new();
        assert_eq!(fsm.handle(LinkEvent::Start), Some(LinkTransition::Started));
        assert_eq!(
            fsm.handle(LinkEvent::Connected),
            Some(LinkTransition::Connected)
        );
        assert!(!fsm.is_ready());
        assert_eq!(
            fsm.handle(LinkEvent::GotAddress(addr())),
            Some(LinkTransition::AddressAssigned(addr()))
        );
        assert!(fsm.is_ready());
    }

    #[test]
    fn got_address_while_disconnected_is_ignored() {
        let mut fsm = LinkFsm::new();
        fsm.handle(LinkEvent::Start);
        assert_eq!(fsm.handle(LinkEvent::GotAddress(addr())), None);
        assert_eq!(fsm.state(), LinkState::Disconnected);
        assert!(!fsm.is_ready());
    }

    #[test]
    fn events_before_start_are_ignored() {
        let mut fsm = LinkFsm::new();
        assert_eq!(fsm.handle(LinkEvent::Connected), None);
        assert_eq!(fsm.handle(LinkEvent::Disconnected), None);
        assert_eq!(fsm.state(), LinkState::Uninitialized);
    }

    #[test]
    fn disconnect_from_ready_drops_readiness() {
        let mut fsm = LinkFsm::new();
        fsm.handle(LinkEvent::Start);
        fsm.handle(LinkEvent::Connected);
        fsm.handle(LinkEvent::GotAddress(None));
        assert_eq!(
            fsm.handle(LinkEvent::Disconnected),
            Some(LinkTransition::Disconnected {
                from: LinkState::Ready
            })
        );
        assert!(!fsm.is_ready());

        // A second start does not re-run bring-up.
        assert_eq!(fsm.handle(LinkEvent::Start), None);
    }
}
