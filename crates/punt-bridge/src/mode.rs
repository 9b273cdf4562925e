//! Operating mode as a closed set of variants.
//!
//! The bridge behaves differently along two independent axes: how packets are framed on the
//! device ([`Encap`]) and whether the device is a routed peer or a punt target ([`Role`]). All four
//! combinations are valid and each decision below is a `match` on one or both axes.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encap {
    /// Raw IP packets (tun).
    #[default]
    Raw,
    /// Ethernet frames (tap).
    Ethernet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Traffic the graph does not forward itself is punted to the external stack.
    #[default]
    PuntInject,
    /// The external stack is a first-class routed interface.
    Normal,
}

/// What the runtime's punt callback does with a frame it could not route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuntCallback {
    Transmit,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InterfaceMode {
    pub encap: Encap,
    pub role: Role,
}

impl InterfaceMode {
    pub const fn new(encap: Encap, role: Role) -> Self {
        Self { encap, role }
    }

    /// Whether TX writes the device's destination MAC in front of each packet.
    pub fn prepends_dst_mac(self) -> bool {
        matches!(
            (self.encap, self.role),
            (Encap::Ethernet, Role::PuntInject)
        )
    }

    pub fn punt_callback(self) -> PuntCallback {
        match self.role {
            Role::PuntInject => PuntCallback::Transmit,
            Role::Normal => PuntCallback::Discard,
        }
    }

    /// Whether the device-class TX function (routed output) forwards to the external stack.
    pub fn interface_tx_transmits(self) -> bool {
        match self.role {
            Role::Normal => true,
            Role::PuntInject => false,
        }
    }

    /// Whether subinterface address changes are provisioned by the bridge.
    pub fn manages_addresses(self) -> bool {
        match self.role {
            Role::PuntInject => true,
            Role::Normal => false,
        }
    }
}

impl fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encap = match self.encap {
            Encap::Raw => "raw",
            Encap::Ethernet => "ethernet",
        };
        let role = match self.role {
            Role::PuntInject => "punt-inject",
            Role::Normal => "normal",
        };
        write!(f, "{encap}/{role}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [InterfaceMode; 4] = [
        InterfaceMode::new(Encap::Raw, Role::PuntInject),
        InterfaceMode::new(Encap::Raw, Role::Normal),
        InterfaceMode::new(Encap::Ethernet, Role::PuntInject),
        InterfaceMode::new(Encap::Ethernet, Role::Normal),
    ];

    #[test]
    fn only_ethernet_punt_inject_prepends_mac() {
        let prepends: Vec<_> = ALL.iter().map(|m| m.prepends_dst_mac()).collect();
        assert_eq!(prepends, vec![false, false, true, false]);
    }

    #[test]
    fn punt_and_interface_tx_are_mutually_exclusive() {
        for mode in ALL {
            let punt_transmits = mode.punt_callback() == PuntCallback::Transmit;
            assert_ne!(punt_transmits, mode.interface_tx_transmits(), "{mode}");
            assert_eq!(punt_transmits, mode.manages_addresses(), "{mode}");
        }
    }

    #[test]
    fn default_is_raw_punt_inject() {
        assert_eq!(
            InterfaceMode::default(),
            InterfaceMode::new(Encap::Raw, Role::PuntInject)
        );
        assert_eq!(InterfaceMode::default().to_string(), "raw/punt-inject");
    }
}
