//! Interface and subinterface-address registry.
//!
//! The bridge owns exactly one interface record today, but records are addressed by
//! [`SwIfIndex`] so subinterface addresses can be keyed on any interface the graph knows about.

use core::fmt;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::mode::{InterfaceMode, Role};

/// Address every routed (normal role) interface starts out with.
pub const DEFAULT_NORMAL_ADDRESS: InterfaceAddress = InterfaceAddress {
    addr: IpAddr::V4(Ipv4Addr::new(192, 168, 12, 1)),
    prefix_len: 24,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: Self = Self([0; 6]);
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwIfIndex(pub u32);

impl fmt::Display for SwIfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterfaceFlags: u8 {
        const ADMIN_UP = 1 << 0;
        const LINK_UP = 1 << 1;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub drops: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl InterfaceAddress {
    /// The prefix length expanded into a mask of the same family as the address.
    pub fn netmask(&self) -> IpAddr {
        match self.addr {
            IpAddr::V4(_) => {
                let bits = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len.min(32)))
                    .unwrap_or(0);
                IpAddr::V4(Ipv4Addr::from(bits))
            }
            IpAddr::V6(_) => {
                let bits = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len.min(128)))
                    .unwrap_or(0);
                IpAddr::V6(Ipv6Addr::from(bits))
            }
        }
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceRecord {
    pub sw_if_index: SwIfIndex,
    /// Graph-side name, `tuntap-<instance>`.
    pub name: String,
    /// OS device name.
    pub device_name: String,
    pub mode: InterfaceMode,
    /// Destination MAC written in front of every punted frame in Ethernet mode.
    pub dst_mac: MacAddr,
    pub mtu_bytes: u32,
    pub mtu_buffers: usize,
    pub flags: InterfaceFlags,
    pub counters: InterfaceCounters,
    pub addresses: Vec<InterfaceAddress>,
}

impl InterfaceRecord {
    pub fn is_up(&self) -> bool {
        self.flags
            .contains(InterfaceFlags::ADMIN_UP | InterfaceFlags::LINK_UP)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// Hash key of a subinterface address. IPv4 addresses occupy the first four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubifKey {
    pub sw_if_index: SwIfIndex,
    pub family: AddressFamily,
    pub addr: [u8; 16],
}

impl SubifKey {
    pub fn new(sw_if_index: SwIfIndex, addr: IpAddr) -> Self {
        let mut bytes = [0u8; 16];
        let family = match addr {
            IpAddr::V4(v4) => {
                bytes[..4].copy_from_slice(&v4.octets());
                AddressFamily::Ipv4
            }
            IpAddr::V6(v6) => {
                bytes.copy_from_slice(&v6.octets());
                AddressFamily::Ipv6
            }
        };
        Self {
            sw_if_index,
            family,
            addr: bytes,
        }
    }
}

/// Slab of subinterface addresses with a hash index over [`SubifKey`].
///
/// The slab index is the alias index; freed slots are handed out again before the slab grows.
#[derive(Debug, Default)]
pub struct SubifTable {
    slots: Vec<Option<SubifKey>>,
    free: Vec<u32>,
    index: HashMap<SubifKey, u32>,
}

impl SubifTable {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lookup(&self, key: &SubifKey) -> Option<u32> {
        self.index.get(key).copied()
    }

    /// Return the alias index for `key`, allocating one on a miss. The flag is `true` on a miss.
    pub fn insert(&mut self, key: SubifKey) -> (u32, bool) {
        if let Some(&alias) = self.index.get(&key) {
            return (alias, false);
        }
        let alias = match self.free.pop() {
            Some(alias) => {
                self.slots[alias as usize] = Some(key);
                alias
            }
            None => {
                self.slots.push(Some(key));
                (self.slots.len() - 1) as u32
            }
        };
        self.index.insert(key, alias);
        (alias, true)
    }

    pub fn remove(&mut self, key: &SubifKey) -> Option<u32> {
        let alias = self.index.remove(key)?;
        self.slots[alias as usize] = None;
        self.free.push(alias);
        Some(alias)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressChange {
    Added,
    /// The address was already present; its alias is reused.
    Reused,
    Removed,
}

/// What the provisioner has to do for one subinterface address change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAction {
    pub change: AddressChange,
    pub alias_index: u32,
    /// OS alias device, `<device>:<alias_index>`.
    pub alias: String,
    pub address: InterfaceAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressOutcome {
    Applied(AddressAction),
    /// The bridge does not manage addresses in its current mode or state.
    Skipped,
}

#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    interfaces: Vec<InterfaceRecord>,
    subifs: SubifTable,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the interface record for a bridge device. The interface starts admin-down.
    pub fn register(&mut self, config: &BridgeConfig, dst_mac: MacAddr) -> SwIfIndex {
        let instance = self.interfaces.len();
        let sw_if_index = SwIfIndex(instance as u32);
        let addresses = match config.mode.role {
            Role::Normal => vec![DEFAULT_NORMAL_ADDRESS],
            Role::PuntInject => Vec::new(),
        };
        self.interfaces.push(InterfaceRecord {
            sw_if_index,
            name: format!("tuntap-{instance}"),
            device_name: config.name.clone(),
            mode: config.mode,
            dst_mac,
            mtu_bytes: config.mtu_bytes,
            mtu_buffers: config.mtu_buffers(),
            flags: InterfaceFlags::empty(),
            counters: InterfaceCounters::default(),
            addresses,
        });
        sw_if_index
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn get(&self, sw_if_index: SwIfIndex) -> Option<&InterfaceRecord> {
        self.interfaces.get(sw_if_index.0 as usize)
    }

    pub fn get_mut(&mut self, sw_if_index: SwIfIndex) -> Option<&mut InterfaceRecord> {
        self.interfaces.get_mut(sw_if_index.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceRecord> {
        self.interfaces.iter()
    }

    pub fn set_flags(&mut self, sw_if_index: SwIfIndex, flags: InterfaceFlags) {
        if let Some(record) = self.get_mut(sw_if_index) {
            record.flags = flags;
        }
    }

    pub fn record_rx(&mut self, sw_if_index: SwIfIndex, bytes: usize) {
        if let Some(record) = self.get_mut(sw_if_index) {
            record.counters.rx_packets += 1;
            record.counters.rx_bytes += bytes as u64;
        }
    }

    pub fn record_tx(&mut self, sw_if_index: SwIfIndex, bytes: usize) {
        if let Some(record) = self.get_mut(sw_if_index) {
            record.counters.tx_packets += 1;
            record.counters.tx_bytes += bytes as u64;
        }
    }

    pub fn record_drop(&mut self, sw_if_index: SwIfIndex) {
        if let Some(record) = self.get_mut(sw_if_index) {
            record.counters.drops += 1;
        }
    }

    pub fn subifs(&self) -> &SubifTable {
        &self.subifs
    }

    /// Record `addr` on `sw_if_index` and name the alias device that should carry it.
    ///
    /// Adding an address that is already present is idempotent and yields the same alias.
    pub fn add_address(
        &mut self,
        device_name: &str,
        sw_if_index: SwIfIndex,
        addr: IpAddr,
        prefix_len: u8,
    ) -> AddressAction {
        let (alias_index, created) = self.subifs.insert(SubifKey::new(sw_if_index, addr));
        AddressAction {
            change: if created {
                AddressChange::Added
            } else {
                AddressChange::Reused
            },
            alias_index,
            alias: format!("{device_name}:{alias_index}"),
            address: InterfaceAddress { addr, prefix_len },
        }
    }

    pub fn delete_address(
        &mut self,
        device_name: &str,
        sw_if_index: SwIfIndex,
        addr: IpAddr,
        prefix_len: u8,
    ) -> Result<AddressAction> {
        let alias_index = self
            .subifs
            .remove(&SubifKey::new(sw_if_index, addr))
            .ok_or(BridgeError::AddressKeyNotFound {
                sw_if_index: sw_if_index.0,
                addr,
            })?;
        Ok(AddressAction {
            change: AddressChange::Removed,
            alias_index,
            alias: format!("{device_name}:{alias_index}"),
            address: InterfaceAddress { addr, prefix_len },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Encap;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn mac_formats_as_colon_hex() {
        let mac = MacAddr([0x02, 0x00, 0x5e, 0x10, 0xab, 0xff]);
        assert_eq!(format!("{mac:?}"), "02:00:5e:10:ab:ff");
        assert_eq!(mac.to_string(), "02:00:5e:10:ab:ff");
    }

    #[test]
    fn register_names_instances_and_seeds_normal_address() {
        let mut registry = InterfaceRegistry::new();
        let punt = registry.register(&BridgeConfig::default(), MacAddr::ZERO);

        let cfg = BridgeConfig {
            mode: InterfaceMode::new(Encap::Raw, Role::Normal),
            ..BridgeConfig::default()
        };
        let normal = registry.register(&cfg, MacAddr::ZERO);

        let punt = registry.get(punt).unwrap();
        assert_eq!(punt.name, "tuntap-0");
        assert_eq!(punt.device_name, "vnet");
        assert!(punt.addresses.is_empty());
        assert!(!punt.is_up());

        let normal = registry.get(normal).unwrap();
        assert_eq!(normal.name, "tuntap-1");
        assert_eq!(normal.addresses, vec![DEFAULT_NORMAL_ADDRESS]);
        assert_eq!(DEFAULT_NORMAL_ADDRESS.to_string(), "192.168.12.1/24");
    }

    #[test]
    fn add_is_idempotent() {
        let mut registry = InterfaceRegistry::new();
        let sw = SwIfIndex(3);

        let first = registry.add_address("vnet", sw, v4(10, 0, 0, 1), 24);
        let again = registry.add_address("vnet", sw, v4(10, 0, 0, 1), 24);
        assert_eq!(first.change, AddressChange::Added);
        assert_eq!(again.change, AddressChange::Reused);
        assert_eq!(first.alias, "vnet:0");
        assert_eq!(again.alias, first.alias);
        assert_eq!(registry.subifs().len(), 1);
    }

    #[test]
    fn key_includes_interface_and_family() {
        let mut registry = InterfaceRegistry::new();
        let a = registry.add_address("vnet", SwIfIndex(1), v4(10, 0, 0, 1), 24);
        let b = registry.add_address("vnet", SwIfIndex(2), v4(10, 0, 0, 1), 24);
        // Same leading bytes as 10.0.0.1 but a different family.
        let v6 = IpAddr::V6(Ipv6Addr::new(0x0a00, 0x0001, 0, 0, 0, 0, 0, 0));
        let c = registry.add_address("vnet", SwIfIndex(1), v6, 64);
        assert_eq!((a.alias_index, b.alias_index, c.alias_index), (0, 1, 2));
    }

    #[test]
    fn delete_frees_the_slot_for_reuse() {
        let mut registry = InterfaceRegistry::new();
        let sw = SwIfIndex(0);
        registry.add_address("vnet", sw, v4(10, 0, 0, 1), 24);
        registry.add_address("vnet", sw, v4(10, 0, 0, 2), 24);

        let removed = registry
            .delete_address("vnet", sw, v4(10, 0, 0, 1), 24)
            .unwrap();
        assert_eq!(removed.change, AddressChange::Removed);
        assert_eq!(removed.alias, "vnet:0");

        let reused = registry.add_address("vnet", sw, v4(10, 0, 0, 3), 24);
        assert_eq!(reused.alias_index, 0);
        assert_eq!(registry.subifs().len(), 2);
    }

    #[test]
    fn delete_of_unknown_key_changes_nothing() {
        let mut registry = InterfaceRegistry::new();
        registry.add_address("vnet", SwIfIndex(0), v4(10, 0, 0, 1), 24);

        let err = registry
            .delete_address("vnet", SwIfIndex(0), v4(10, 0, 0, 9), 24)
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::AddressKeyNotFound { sw_if_index: 0, .. }
        ));
        assert_eq!(registry.subifs().len(), 1);
    }

    #[test]
    fn netmask_matches_prefix() {
        let a = InterfaceAddress {
            addr: v4(10, 1, 2, 3),
            prefix_len: 20,
        };
        assert_eq!(a.netmask(), v4(255, 255, 240, 0));

        let any = InterfaceAddress {
            addr: v4(0, 0, 0, 0),
            prefix_len: 0,
        };
        assert_eq!(any.netmask(), v4(0, 0, 0, 0));

        let v6 = InterfaceAddress {
            addr: IpAddr::V6(Ipv6Addr::LOCALHOST),
            prefix_len: 64,
        };
        assert_eq!(
            v6.netmask(),
            IpAddr::V6(Ipv6Addr::new(0xffff, 0xffff, 0xffff, 0xffff, 0, 0, 0, 0))
        );
    }
}
