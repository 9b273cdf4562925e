use std::net::IpAddr;

use punt_buffer::{BufferPool, RxBufferCache};
use punt_ipc::{transport, DataplaneEndpoint, StackEndpoint};
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::interface::{
    AddressOutcome, InterfaceFlags, InterfaceRecord, InterfaceRegistry, MacAddr, SwIfIndex,
};
use crate::provision::{self, AliasAddress, Device, DeviceProvisioner};
use crate::stats::BridgeStats;

/// All state of one punt/inject bridge.
///
/// Construction allocates the buffer pool, both rings and the interface record. The OS device is
/// only provisioned by [`Bridge::enable`].
#[derive(Debug)]
pub struct Bridge<P> {
    pub(crate) config: BridgeConfig,
    pub(crate) pool: BufferPool,
    pub(crate) rx_cache: RxBufferCache,
    pub(crate) transport: DataplaneEndpoint,
    pub(crate) registry: InterfaceRegistry,
    pub(crate) sw_if_index: SwIfIndex,
    pub(crate) stats: BridgeStats,
    provisioner: P,
    device: Option<Device>,
}

impl<P: DeviceProvisioner> Bridge<P> {
    /// Build a bridge and hand back the endpoint the external stack drives.
    pub fn new(config: BridgeConfig, provisioner: P) -> (Self, StackEndpoint) {
        let pool = BufferPool::new(config.buffers);
        let (dataplane, stack) = transport::pair(config.ring_capacity);
        let mut registry = InterfaceRegistry::new();
        let sw_if_index = registry.register(&config, MacAddr::ZERO);

        let bridge = Self {
            config,
            pool,
            rx_cache: RxBufferCache::default(),
            transport: dataplane,
            registry,
            sw_if_index,
            stats: BridgeStats::default(),
            provisioner,
            device: None,
        };
        (bridge, stack)
    }

    /// Provision the OS device and bring the interface up.
    ///
    /// A configuration without `enable` and an unprivileged provisioner both leave the bridge
    /// disabled without an error. On provisioning failure the bridge stays disabled and nothing
    /// is left open.
    pub fn enable(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }
        if !self.config.enabled {
            info!(device = %self.config.name, "bridge disabled by configuration");
            return Ok(());
        }
        if !self.provisioner.is_privileged() {
            warn!(
                device = %self.config.name,
                "not running with device privileges, bridge left disabled"
            );
            return Ok(());
        }

        let device = match provision::provision(&mut self.provisioner, &self.config) {
            Ok(device) => device,
            Err(err) => {
                error!(device = %self.config.name, error = %err, "failed to provision device");
                return Err(err);
            }
        };

        if let Some(record) = self.registry.get_mut(self.sw_if_index) {
            record.dst_mac = device.dst_mac;
            record.flags = InterfaceFlags::ADMIN_UP | InterfaceFlags::LINK_UP;
        }
        self.device = Some(device);
        self.rx_cache.replenish(&mut self.pool);

        info!(
            device = %self.config.name,
            sw_if_index = %self.sw_if_index,
            mode = %self.config.mode,
            mtu = self.config.mtu_bytes,
            "bridge enabled"
        );
        Ok(())
    }

    /// Flush pending RX, return cached buffers and close the device.
    pub fn disable(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };

        let mut flushed = 0usize;
        while self.transport.from_stack.try_pop().is_ok() {
            flushed += 1;
        }
        self.rx_cache.release_all(&mut self.pool);
        provision::teardown(&mut self.provisioner, device, &self.config.name);
        self.registry
            .set_flags(self.sw_if_index, InterfaceFlags::empty());

        info!(device = %self.config.name, flushed, "bridge disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.device.is_some()
    }

    /// Whether subinterface address changes are provisioned right now.
    fn manages_addresses(&self) -> bool {
        self.config.mode.manages_addresses() && self.is_enabled()
    }

    /// Put `addr/prefix_len` on the alias device for `(sw_if_index, addr)`.
    pub fn add_address(
        &mut self,
        sw_if_index: SwIfIndex,
        addr: IpAddr,
        prefix_len: u8,
    ) -> Result<AddressOutcome> {
        if !self.manages_addresses() {
            return Ok(AddressOutcome::Skipped);
        }

        let action = self
            .registry
            .add_address(&self.config.name, sw_if_index, addr, prefix_len);
        let alias = AliasAddress {
            alias: action.alias.clone(),
            address: action.address,
        };
        if let Err(err) = self.provisioner.set_alias_address(&alias) {
            warn!(
                alias = %alias.alias,
                address = %alias.address,
                error = %err,
                "failed to set alias address"
            );
        }
        Ok(AddressOutcome::Applied(action))
    }

    /// Remove a subinterface address added by [`Bridge::add_address`].
    pub fn delete_address(
        &mut self,
        sw_if_index: SwIfIndex,
        addr: IpAddr,
        prefix_len: u8,
    ) -> Result<AddressOutcome> {
        if !self.manages_addresses() {
            return Ok(AddressOutcome::Skipped);
        }

        let action = match self
            .registry
            .delete_address(&self.config.name, sw_if_index, addr, prefix_len)
        {
            Ok(action) => action,
            Err(err) => {
                warn!(error = %err, "address delete ignored");
                return Err(err);
            }
        };
        let alias = AliasAddress {
            alias: action.alias.clone(),
            address: action.address,
        };
        if let Err(err) = self.provisioner.clear_alias_address(&alias) {
            warn!(
                alias = %alias.alias,
                address = %alias.address,
                error = %err,
                "failed to clear alias address"
            );
        }
        Ok(AddressOutcome::Applied(action))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn sw_if_index(&self) -> SwIfIndex {
        self.sw_if_index
    }

    pub fn interface(&self) -> Option<&InterfaceRecord> {
        self.registry.get(self.sw_if_index)
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Mutable pool access for the graph side, which allocates the chains it hands to TX.
    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub fn rx_cache_len(&self) -> usize {
        self.rx_cache.len()
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::error::BridgeError;
    use crate::interface::AddressChange;
    use crate::mode::{Encap, InterfaceMode, Role};
    use crate::provision::{InMemoryProvisioner, ProvisionStep};

    fn enabled(mode: InterfaceMode) -> BridgeConfig {
        BridgeConfig {
            enabled: true,
            mode,
            ..BridgeConfig::default()
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn enable_brings_the_interface_up() {
        let (mut bridge, _stack) = Bridge::new(
            enabled(InterfaceMode::new(Encap::Ethernet, Role::PuntInject)),
            InMemoryProvisioner::default(),
        );
        bridge.enable().unwrap();

        assert!(bridge.is_enabled());
        let record = bridge.interface().unwrap();
        assert!(record.is_up());
        assert_eq!(record.dst_mac, bridge.provisioner().hw_addr);
        assert_eq!(bridge.rx_cache_len(), punt_buffer::FRAME_SIZE);
    }

    #[test]
    fn disabled_config_and_unprivileged_process_skip_enable() {
        let (mut bridge, _stack) =
            Bridge::new(BridgeConfig::default(), InMemoryProvisioner::default());
        bridge.enable().unwrap();
        assert!(!bridge.is_enabled());

        let provisioner = InMemoryProvisioner {
            privileged: false,
            ..InMemoryProvisioner::default()
        };
        let (mut bridge, _stack) = Bridge::new(enabled(InterfaceMode::default()), provisioner);
        bridge.enable().unwrap();
        assert!(!bridge.is_enabled());
        assert!(bridge.provisioner().open_handles.is_empty());
    }

    #[test]
    fn failed_enable_leaves_bridge_disabled() {
        let (mut bridge, _stack) = Bridge::new(
            enabled(InterfaceMode::default()),
            InMemoryProvisioner::failing_at(ProvisionStep::SetMtu),
        );
        let err = bridge.enable().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InterfaceConfigFailure {
                step: ProvisionStep::SetMtu,
                ..
            }
        ));
        assert!(!bridge.is_enabled());
        assert!(bridge.provisioner().open_handles.is_empty());
        assert!(!bridge.interface().unwrap().is_up());
    }

    #[test]
    fn disable_returns_every_buffer() {
        let (mut bridge, _stack) =
            Bridge::new(enabled(InterfaceMode::default()), InMemoryProvisioner::default());
        bridge.enable().unwrap();
        assert!(bridge.pool().owned_count() > 0);

        bridge.disable();
        assert!(!bridge.is_enabled());
        assert_eq!(bridge.pool().owned_count(), 0);
        assert!(bridge.provisioner().open_handles.is_empty());
        assert!(!bridge.interface().unwrap().is_up());
    }

    #[test]
    fn addresses_are_provisioned_on_alias_devices() {
        let (mut bridge, _stack) =
            Bridge::new(enabled(InterfaceMode::default()), InMemoryProvisioner::default());
        bridge.enable().unwrap();
        let sw = bridge.sw_if_index();

        let AddressOutcome::Applied(first) = bridge.add_address(sw, addr(1), 24).unwrap() else {
            panic!("address change skipped");
        };
        let AddressOutcome::Applied(again) = bridge.add_address(sw, addr(1), 24).unwrap() else {
            panic!("address change skipped");
        };
        assert_eq!(first.alias, "vnet:0");
        assert_eq!(again.change, AddressChange::Reused);
        assert_eq!(bridge.provisioner().aliases.len(), 1);

        bridge.delete_address(sw, addr(1), 24).unwrap();
        assert!(bridge.provisioner().aliases.is_empty());

        let err = bridge.delete_address(sw, addr(1), 24).unwrap_err();
        assert!(matches!(err, BridgeError::AddressKeyNotFound { .. }));
    }

    #[test]
    fn address_changes_skipped_in_normal_role_or_when_disabled() {
        let (mut bridge, _stack) = Bridge::new(
            enabled(InterfaceMode::new(Encap::Raw, Role::Normal)),
            InMemoryProvisioner::default(),
        );
        bridge.enable().unwrap();
        let sw = bridge.sw_if_index();
        assert_eq!(
            bridge.add_address(sw, addr(1), 24).unwrap(),
            AddressOutcome::Skipped
        );
        assert_eq!(
            bridge.delete_address(sw, addr(1), 24).unwrap(),
            AddressOutcome::Skipped
        );

        let (mut bridge, _stack) =
            Bridge::new(BridgeConfig::default(), InMemoryProvisioner::default());
        assert_eq!(
            bridge.add_address(SwIfIndex(0), addr(1), 24).unwrap(),
            AddressOutcome::Skipped
        );
        assert!(bridge.registry().subifs().is_empty());
    }
}
